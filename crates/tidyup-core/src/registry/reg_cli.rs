use super::{RegistryBackend, RegistryRow};
use crate::error::Error;
use crate::model::truncate_text;
use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::process::Command;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        let output = command.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

lazy_static! {
    static ref VALUE_ROW: Regex =
        Regex::new(r"(?i)^\s{2,}(\S.*?)\s{2,}(REG_\w+)\s{2,}(.*)$").expect("valid reg row regex");
}

/// Splits `reg query` output into value rows. Lines starting with `HKEY_`
/// switch the current key; value lines are columns separated by runs of two
/// or more spaces. Rows seen before any key line are dropped.
pub fn parse_reg_rows(stdout: &str) -> Vec<RegistryRow> {
    let mut rows = Vec::new();
    let mut current_key = String::new();

    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let head = line.trim_start();
        if head
            .get(..5)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("HKEY_"))
        {
            current_key = head.to_string();
            continue;
        }
        if current_key.is_empty() {
            continue;
        }
        if let Some(caps) = VALUE_ROW.captures(line) {
            rows.push(RegistryRow {
                key: current_key.clone(),
                value_name: caps[1].trim().to_string(),
                value_type: caps[2].trim().to_ascii_uppercase(),
                data: caps[3].trim().to_string(),
            });
        }
    }

    rows
}

fn failure_detail(output: &CommandOutput) -> String {
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    if detail.is_empty() {
        "command failed".to_string()
    } else {
        truncate_text(detail, 200)
    }
}

/// Registry access through the `reg` command-line tool.
pub struct RegCli<R = SystemCommandRunner> {
    runner: R,
}

impl RegCli<SystemCommandRunner> {
    pub fn system() -> Self {
        Self::new(SystemCommandRunner)
    }
}

impl<R: CommandRunner> RegCli<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn reg(&self, args: &[&str]) -> Result<CommandOutput, Error> {
        let output = self.runner.run("reg", args)?;
        if output.success {
            Ok(output)
        } else {
            Err(Error::Registry(failure_detail(&output)))
        }
    }
}

impl<R: CommandRunner> RegistryBackend for RegCli<R> {
    fn available(&self) -> bool {
        cfg!(windows)
    }

    fn query_key(&self, key: &str) -> Result<Vec<RegistryRow>, Error> {
        let output = self.reg(&["query", key])?;
        Ok(parse_reg_rows(&output.stdout))
    }

    fn delete_value(&self, key: &str, value_name: &str) -> Result<(), Error> {
        self.reg(&["delete", key, "/v", value_name, "/f"]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const RUN_OUTPUT: &str = concat!(
        "\r\n",
        "HKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Run\r\n",
        "    OneDrive    REG_SZ    \"C:\\Program Files\\Microsoft OneDrive\\OneDrive.exe\" /background\r\n",
        "    Updater    REG_EXPAND_SZ    %LOCALAPPDATA%\\Updater\\update.exe -quiet\r\n",
        "    Flags    REG_DWORD    0x1\r\n",
        "\r\n",
    );

    struct ScriptedRunner {
        output: CommandOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(output: CommandOutput) -> Self {
            Self {
                output,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for &ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|arg| arg.to_string()));
            self.calls.lock().unwrap().push(call);
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_parse_reg_rows() {
        let rows = parse_reg_rows(RUN_OUTPUT);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0].key,
            "HKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Run"
        );
        assert_eq!(rows[0].value_name, "OneDrive");
        assert_eq!(rows[0].value_type, "REG_SZ");
        assert_eq!(
            rows[0].data,
            "\"C:\\Program Files\\Microsoft OneDrive\\OneDrive.exe\" /background"
        );
        assert_eq!(rows[1].value_type, "REG_EXPAND_SZ");
        assert_eq!(rows[2].data, "0x1");
    }

    #[test]
    fn test_parse_reg_rows_names_with_spaces_and_no_key() {
        let output = concat!(
            "    Orphan    REG_SZ    x\n",
            "HKEY_CURRENT_USER\\Software\\Test\n",
            "    My App Name    REG_SZ    C:\\apps\\my app.exe\n",
        );
        let rows = parse_reg_rows(output);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_name, "My App Name");
        assert_eq!(rows[0].data, "C:\\apps\\my app.exe");
    }

    #[test]
    fn test_query_and_delete_arguments() {
        let runner = ScriptedRunner::new(CommandOutput {
            success: true,
            stdout: RUN_OUTPUT.to_string(),
            stderr: String::new(),
        });
        let reg = RegCli::new(&runner);
        let rows = reg.query_key("HKCU\\Software\\Run").unwrap();
        assert_eq!(rows.len(), 3);
        reg.delete_value("HKCU\\Software\\Run", "Updater").unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["reg", "query", "HKCU\\Software\\Run"]);
        assert_eq!(
            calls[1],
            vec!["reg", "delete", "HKCU\\Software\\Run", "/v", "Updater", "/f"]
        );
    }

    #[test]
    fn test_failed_command_reports_stderr() {
        let runner = ScriptedRunner::new(CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: "ERROR: Access is denied.\r\n".to_string(),
        });
        let reg = RegCli::new(&runner);
        match reg.delete_value("HKLM\\Software\\Run", "Agent") {
            Err(Error::Registry(detail)) => assert_eq!(detail, "ERROR: Access is denied."),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
