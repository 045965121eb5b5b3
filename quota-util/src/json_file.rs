// Copyright (c) Facebook, Inc. and its affiliates.
//! Json files with a `//` comment preamble. Args, params, models and
//! reports all go through here.
use anyhow::{Context, Result};
use log::info;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A file modified more recently than this may still be being written.
const RELOAD_SETTLE: Duration = Duration::from_millis(10);

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("//") || line.starts_with('#')
}

/// Returns the leading comment block and the body with every comment line
/// blanked so that serde error positions still point into the file.
fn split_preamble(buf: &str) -> (String, String) {
    let nr_pre = buf.lines().take_while(|l| is_comment(l)).count();
    let mut preamble = String::new();
    let mut body = String::new();

    for (i, line) in buf.lines().enumerate() {
        if i < nr_pre {
            preamble.push_str(line);
            preamble.push('\n');
        }
        if !is_comment(line) {
            body.push_str(line);
        }
        body.push('\n');
    }
    (preamble, body)
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Reading mtime of {:?}", path))
}

pub trait JsonLoad: DeserializeOwned {
    /// Validation after parsing. An error fails the load.
    fn loaded(&mut self) -> Result<()> {
        Ok(())
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path).with_context(|| format!("Reading {:?}", path))?;
        let (_, body) = split_preamble(&buf);
        serde_json::from_str(&body).with_context(|| format!("Parsing {:?}", path))
    }
}

pub trait JsonSave: Default + Serialize {
    fn preamble() -> Option<String> {
        None
    }

    fn as_json(&self) -> Result<String> {
        let mut out = Self::preamble().unwrap_or_default();
        out += &serde_json::to_string_pretty(self)?;
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.as_json()?).with_context(|| format!("Writing {:?}", path))
    }

    /// Write the defaults to `path` unless it already exists. Returns
    /// whether the file was created.
    fn create_default<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Creating {:?}", dir))?;
        }

        let mut f = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("Creating {:?}", path)),
        };
        f.write_all(Self::default().as_json()?.as_bytes())?;
        Ok(true)
    }
}

/// A loaded json file which can be picked up again when it changes.
#[derive(Clone, Debug)]
pub struct JsonConfigFile<T: JsonLoad + JsonSave> {
    pub path: Option<PathBuf>,
    pub loaded_mod: SystemTime,
    pub data: T,
}

impl<T: JsonLoad + JsonSave> JsonConfigFile<T> {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let loaded_mod = modified(path)?;
        let mut data = T::load(path)?;
        data.loaded()?;

        Ok(Self {
            path: Some(path.to_owned()),
            loaded_mod,
            data,
        })
    }

    /// Without a path the defaults are used and nothing touches the disk.
    pub fn load_or_create<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let path = match path {
            Some(v) => v,
            None => {
                let mut data = T::default();
                data.loaded()?;
                return Ok(Self {
                    path: None,
                    loaded_mod: UNIX_EPOCH,
                    data,
                });
            }
        };

        if T::create_default(&path)? {
            info!("cfg: Created {:?}", path.as_ref());
        }
        Self::load(path)
    }

    pub fn save(&self) -> Result<()> {
        match self.path.as_ref() {
            Some(path) => self.data.save(path),
            None => Ok(()),
        }
    }

    /// Reload if the file changed since it was last looked at. Returns
    /// whether `data` was replaced.
    pub fn maybe_reload(&mut self) -> Result<bool> {
        let path = match self.path.as_deref() {
            Some(v) => v,
            None => return Ok(false),
        };

        let mtime = modified(path)?;
        let settled = match SystemTime::now().duration_since(mtime) {
            Ok(age) => age >= RELOAD_SETTLE,
            Err(_) => true,
        };
        if mtime == self.loaded_mod || !settled {
            return Ok(false);
        }

        // A broken file is reported once per modification.
        self.loaded_mod = mtime;
        let mut data = T::load(path)?;
        data.loaded()?;
        self.data = data;
        Ok(true)
    }
}

/// Command line arguments backed by an optional `--args` file. Options on
/// the command line override the file and are written back into it.
pub trait JsonArgs: JsonLoad + JsonSave {
    fn match_cmdline() -> clap::ArgMatches<'static>;
    fn verbosity(matches: &clap::ArgMatches) -> u32;
    /// Apply `matches`. Returns whether the args file needs updating.
    fn process_cmdline(&mut self, matches: &clap::ArgMatches) -> Result<bool>;

    fn init_args_and_logging() -> Result<JsonConfigFile<Self>> {
        let matches = Self::match_cmdline();
        super::init_logging(Self::verbosity(&matches));

        let mut args_file = JsonConfigFile::<Self>::load_or_create(matches.value_of("args"))?;
        if args_file.data.process_cmdline(&matches)? {
            if let Some(path) = args_file.path.as_deref() {
                info!("Updating command line arguments file {:?}", path);
            }
            args_file.save()?;
        }
        Ok(args_file)
    }
}

/// Report committed by writing `PATH.staging` and renaming it over `PATH`.
#[derive(Debug)]
pub struct JsonReportFile<T: JsonSave> {
    pub path: Option<PathBuf>,
    pub staging: PathBuf,
    pub data: T,
}

impl<T: JsonSave> JsonReportFile<T> {
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Self {
        let path = path.map(|p| p.as_ref().to_owned());
        let staging = match path.as_ref() {
            Some(p) => {
                let mut st = p.clone().into_os_string();
                st.push(".staging");
                PathBuf::from(st)
            }
            None => PathBuf::new(),
        };

        Self {
            path,
            staging,
            data: T::default(),
        }
    }

    pub fn commit(&self) -> Result<()> {
        if let Some(path) = self.path.as_ref() {
            self.data.save(&self.staging)?;
            fs::rename(&self.staging, path)
                .with_context(|| format!("Renaming {:?} to {:?}", &self.staging, path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Knobs {
        step: f64,
        name: String,
    }

    impl Default for Knobs {
        fn default() -> Self {
            Self {
                step: 0.1,
                name: "dfl".into(),
            }
        }
    }

    impl JsonLoad for Knobs {
        fn loaded(&mut self) -> Result<()> {
            if self.step <= 0.0 {
                bail!("step {} is not positive", self.step);
            }
            Ok(())
        }
    }

    impl JsonSave for Knobs {
        fn preamble() -> Option<String> {
            Some("//\n// test knobs\n//\n".into())
        }
    }

    #[test]
    fn test_split_preamble() {
        let (pre, body) = split_preamble("// a\n# b\n{\n  // c\n  \"x\": 1\n}\n");
        assert_eq!(pre, "// a\n# b\n");
        assert_eq!(body, "\n\n{\n\n  \"x\": 1\n}\n");
    }

    #[test]
    fn test_load_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/knobs.json");

        let file = JsonConfigFile::<Knobs>::load_or_create(Some(&path)).unwrap();
        assert_eq!(file.data, Knobs::default());
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.starts_with("//\n// test knobs\n"));

        fs::write(&path, "// edited\n{ \"step\": 0.5 }\n").unwrap();
        let file = JsonConfigFile::<Knobs>::load(&path).unwrap();
        assert_eq!(file.data.step, 0.5);
        assert_eq!(file.data.name, "dfl");

        let file = JsonConfigFile::<Knobs>::load_or_create(None::<&str>).unwrap();
        assert!(file.path.is_none());
        file.save().unwrap();
    }

    #[test]
    fn test_maybe_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knobs.json");
        let mut file = JsonConfigFile::<Knobs>::load_or_create(Some(&path)).unwrap();
        std::thread::sleep(RELOAD_SETTLE * 2);
        assert!(!file.maybe_reload().unwrap());

        fs::write(&path, "{ \"step\": 0.25 }\n").unwrap();
        file.loaded_mod = UNIX_EPOCH;
        std::thread::sleep(RELOAD_SETTLE * 2);
        assert!(file.maybe_reload().unwrap());
        assert_eq!(file.data.step, 0.25);

        // invalid contents keep the old data and aren't retried
        fs::write(&path, "{ \"step\": -1.0 }\n").unwrap();
        file.loaded_mod = UNIX_EPOCH;
        std::thread::sleep(RELOAD_SETTLE * 2);
        assert!(file.maybe_reload().is_err());
        assert!(!file.maybe_reload().unwrap());
        assert_eq!(file.data.step, 0.25);
    }

    #[test]
    fn test_report_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut rf = JsonReportFile::<Knobs>::new(Some(&path));
        assert_eq!(rf.staging, dir.path().join("report.json.staging"));
        rf.data.name = "committed".into();
        rf.commit().unwrap();

        assert!(!rf.staging.exists());
        let loaded = Knobs::load(&path).unwrap();
        assert_eq!(loaded.name, "committed");

        let rf = JsonReportFile::<Knobs>::new(None::<&str>);
        rf.commit().unwrap();
    }
}
