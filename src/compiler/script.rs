// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Command-to-script materialization
//!
//! The commands of a step are rendered into one script, base64 encoded into
//! `CI_SCRIPT` and decoded by a fixed entrypoint inside the container.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;

/// Entrypoint, commands and extra environment for a scripted step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub entrypoint: Vec<String>,
    pub commands: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Render `commands` for the given target platform (`os/arch`)
pub fn generate(platform: &str, commands: &[String]) -> Script {
    if platform.starts_with("windows") {
        windows(commands)
    } else {
        posix(commands)
    }
}

fn posix(commands: &[String]) -> Script {
    let mut script = String::from(POSIX_SETUP);
    for command in commands {
        script.push_str(&format!(
            "\necho + {}\n{}\n",
            shell_quote(command),
            command
        ));
    }

    Script {
        entrypoint: vec!["/bin/sh".into(), "-c".into()],
        commands: vec!["echo $CI_SCRIPT | base64 -d | /bin/sh -e".into()],
        environment: BTreeMap::from([
            ("CI_SCRIPT".to_string(), STANDARD.encode(script)),
            ("HOME".to_string(), "/root".to_string()),
            ("SHELL".to_string(), "/bin/sh".to_string()),
        ]),
    }
}

fn windows(commands: &[String]) -> Script {
    let mut script = String::from(WINDOWS_SETUP);
    for command in commands {
        script.push_str(&format!(
            "\nWrite-Output ('+ {}');\n& {}; if ($LASTEXITCODE -ne 0) {{exit $LASTEXITCODE}}\n",
            command.replace('\'', "''"),
            command
        ));
    }

    Script {
        entrypoint: vec![
            "powershell".into(),
            "-noprofile".into(),
            "-noninteractive".into(),
            "-command".into(),
        ],
        commands: vec![
            "[System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String($Env:CI_SCRIPT)) | iex"
                .into(),
        ],
        environment: BTreeMap::from([
            ("CI_SCRIPT".to_string(), STANDARD.encode(script)),
            ("HOME".to_string(), "c:\\root".to_string()),
            ("SHELL".to_string(), "powershell.exe".to_string()),
        ]),
    }
}

/// Single-quote for `/bin/sh`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

const POSIX_SETUP: &str = r#"
if [ -n "$CI_NETRC_MACHINE" ]; then
cat <<EOF > $HOME/.netrc
machine $CI_NETRC_MACHINE
login $CI_NETRC_USERNAME
password $CI_NETRC_PASSWORD
EOF
chmod 0600 $HOME/.netrc
fi
unset CI_NETRC_USERNAME
unset CI_NETRC_PASSWORD
unset CI_SCRIPT
"#;

const WINDOWS_SETUP: &str = r#"
$ErrorActionPreference = 'Stop';
if ($Env:CI_NETRC_MACHINE) {
$netrc=[string]::Format("{0}\_netrc",$Env:HOME);
"machine $Env:CI_NETRC_MACHINE" >> $netrc;
"login $Env:CI_NETRC_USERNAME" >> $netrc;
"password $Env:CI_NETRC_PASSWORD" >> $netrc;
};
[Environment]::SetEnvironmentVariable("CI_NETRC_PASSWORD",$null);
[Environment]::SetEnvironmentVariable("CI_SCRIPT",$null);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(script: &Script) -> String {
        String::from_utf8(STANDARD.decode(&script.environment["CI_SCRIPT"]).unwrap()).unwrap()
    }

    #[test]
    fn test_posix_script() {
        let script = generate("linux/amd64", &["go build".into(), "echo 'done'".into()]);
        assert_eq!(script.entrypoint, vec!["/bin/sh", "-c"]);
        assert_eq!(script.commands, vec!["echo $CI_SCRIPT | base64 -d | /bin/sh -e"]);
        assert_eq!(script.environment["HOME"], "/root");
        assert_eq!(script.environment["SHELL"], "/bin/sh");

        let body = decode(&script);
        assert!(body.contains("echo + 'go build'\ngo build\n"));
        assert!(body.contains(r"echo + 'echo '\''done'\'''"));
        assert!(body.contains("$HOME/.netrc"));
        assert!(body.find("go build") < body.find("echo 'done'"));
    }

    #[test]
    fn test_windows_script() {
        let script = generate("windows/amd64", &["dir".into()]);
        assert_eq!(script.entrypoint[0], "powershell");
        assert!(script.commands[0].contains("FromBase64String($Env:CI_SCRIPT)"));
        assert_eq!(script.environment["HOME"], "c:\\root");
        assert_eq!(script.environment["SHELL"], "powershell.exe");
        assert!(decode(&script).contains("& dir;"));
    }
}
