use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment-variable lookup. Empty values count as unset.
pub trait Environment: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

/// Fixed set of variables, for callers that must not depend on the host.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }
}

impl Environment for MapEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|value| !value.is_empty()).cloned()
    }
}

lazy_static! {
    static ref PERCENT_VAR: Regex = Regex::new(r"%([^%]+)%").expect("valid env token regex");
}

/// Expands Windows-style `%NAME%` tokens. Unknown names are left as written.
pub fn expand_env(input: &str, env: &dyn Environment) -> String {
    PERCENT_VAR
        .replace_all(input, |caps: &Captures| {
            env.var(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Host directories that junk targets and duplicate roots are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialDirs {
    pub home: PathBuf,
    pub temp: PathBuf,
    pub cache: PathBuf,
    pub data: PathBuf,
    pub local_app_data: PathBuf,
    pub app_data: PathBuf,
    pub program_data: PathBuf,
    pub windir: PathBuf,
}

impl SpecialDirs {
    pub fn from_env(env: &dyn Environment) -> Self {
        let path_var = |name: &str| env.var(name).map(PathBuf::from);

        let home = path_var("USERPROFILE")
            .or_else(|| path_var("HOME"))
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    PathBuf::from("C:/Users/Public")
                } else {
                    PathBuf::from("/")
                }
            });
        let local_app_data =
            path_var("LOCALAPPDATA").unwrap_or_else(|| home.join("AppData").join("Local"));
        let app_data = path_var("APPDATA").unwrap_or_else(|| home.join("AppData").join("Roaming"));
        let temp = path_var("TEMP")
            .or_else(|| path_var("TMPDIR"))
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    local_app_data.join("Temp")
                } else {
                    PathBuf::from("/tmp")
                }
            });
        let cache = path_var("XDG_CACHE_HOME").unwrap_or_else(|| home.join(".cache"));
        let data =
            path_var("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share"));

        Self {
            temp,
            cache,
            data,
            local_app_data,
            app_data,
            program_data: path_var("ProgramData").unwrap_or_else(|| PathBuf::from("C:/ProgramData")),
            windir: path_var("WINDIR").unwrap_or_else(|| PathBuf::from("C:/Windows")),
            home,
        }
    }
}
