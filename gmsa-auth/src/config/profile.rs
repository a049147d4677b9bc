use config::{Config, File, FileFormat};
use std::env;

const DEFAULT_PROFILE_PATH: &str = "/etc/gmsa-auth.conf";
const PROFILE_PATH_ENV: &str = "GMSA_AUTH_CONFIG";

/// Operator defaults read from INI files, looked up the way krb5 reads
/// `krb5.conf`: the first file that defines a key wins.
#[derive(Debug)]
pub struct Profile {
    files: Vec<ProfileFile>,
}

macro_rules! get_value {
    ($fn:ident, $type:ident) => {
        pub fn $fn(&self, key: &str) -> Option<$type> {
            for file in &self.files {
                if let Ok(value) = file.config.$fn(key) {
                    return Some(value);
                }
            }
            None
        }
    };
}

impl Profile {
    /// Loads `GMSA_AUTH_CONFIG` (colon separated) or the default path. Missing
    /// files are skipped; unreadable or malformed ones are an error.
    pub fn new() -> anyhow::Result<Self> {
        let mut profile_files = vec![];
        for file in Self::default_config_files() {
            profile_files.push(ProfileFile::new(&file)?);
        }
        Ok(Self {
            files: profile_files,
        })
    }

    /// A profile with no files; every lookup falls back to the caller's default.
    pub fn empty() -> Self {
        Self { files: vec![] }
    }

    pub fn from_ini(contents: &str) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Ini))
            .build()?;
        Ok(Self {
            files: vec![ProfileFile { config }],
        })
    }

    fn default_config_files() -> Vec<String> {
        let filepath = env::var(PROFILE_PATH_ENV).unwrap_or(DEFAULT_PROFILE_PATH.to_owned());
        filepath
            .split(':')
            .filter(|f| !f.is_empty())
            .map(|f| f.to_owned())
            .collect()
    }

    get_value!(get_string, String);

    get_value!(get_bool, bool);

    get_value!(get_int, i64);
}

#[derive(Debug)]
struct ProfileFile {
    config: Config,
}

impl ProfileFile {
    fn new(filename: &str) -> anyhow::Result<Self> {
        let expanded_filename = match (filename.starts_with("~/"), env::var("HOME")) {
            (true, Ok(home_env)) => format!("{}{}", home_env, &filename[1..]),
            _ => filename.to_owned(),
        };
        let config = Config::builder()
            .add_source(
                File::with_name(&expanded_filename)
                    .format(FileFormat::Ini)
                    .required(false),
            )
            .build()?;
        Ok(Self { config })
    }
}
