use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_FILE_FLAG: &str = "--env-file";
const ENV_FILE_VAR: &str = "SHARDEX_ENV_FILE";

/// Env files to read, lowest precedence first. An explicit file must exist.
struct EnvSources {
    files: Vec<PathBuf>,
    required: bool,
}

impl EnvSources {
    fn resolve(cwd: &Path, explicit: Option<PathBuf>) -> Self {
        match explicit {
            Some(path) => EnvSources {
                files: vec![cwd.join(path)],
                required: true,
            },
            None => EnvSources {
                files: vec![cwd.join(".env"), cwd.join(".env.local")],
                required: false,
            },
        }
    }
}

/// Loads env files before clap sees the arguments so `SHARDEX_*` fallbacks
/// apply. Returns the files that were read.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<Vec<PathBuf>> {
    let explicit = env_file_arg(args).or_else(|| std::env::var_os(ENV_FILE_VAR).map(PathBuf::from));
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    load_env(&EnvSources::resolve(&cwd, explicit))
}

/// Variables already present in the process environment are never replaced.
fn load_env(sources: &EnvSources) -> Result<Vec<PathBuf>> {
    let mut values = BTreeMap::new();
    let mut read = Vec::new();

    for path in &sources.files {
        if !sources.required && !path.is_file() {
            continue;
        }
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("failed to read env file {}", path.display()))?;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("failed to parse env file {}", path.display()))?;
            if std::env::var_os(&key).is_none() {
                values.insert(key, value);
            }
        }
        read.push(path.clone());
    }

    for (key, value) in values {
        std::env::set_var(key, value);
    }
    Ok(read)
}

/// Last `--env-file` before a `--` separator, in either `--env-file PATH` or
/// `--env-file=PATH` form.
fn env_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut found = None;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.to_str() {
            Some("--") => break,
            Some(ENV_FILE_FLAG) => found = rest.next().map(PathBuf::from),
            Some(arg) => {
                if let Some(value) = arg
                    .strip_prefix(ENV_FILE_FLAG)
                    .and_then(|tail| tail.strip_prefix('='))
                {
                    found = Some(PathBuf::from(value));
                }
            }
            None => {}
        }
    }
    found
}
