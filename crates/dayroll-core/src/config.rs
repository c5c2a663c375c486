use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::sync::SyncTimings;

const RC_ENV_VAR: &str = "DAYROLLRC";
const RC_FILE_NAME: &str = ".dayrollrc";
const DEFAULT_DATA_DIR: &str =
  "~/.dayroll";

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", DEFAULT_DATA_DIR),
  ("color", "on"),
  ("sync.debounce_ms", "2000"),
  ("sync.pull_debounce_ms", "500"),
  ("sync.poll_seconds", "30"),
  ("tick.seconds", "60")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

/// Remote replica settings. `url` and
/// `api_key` are both needed before
/// anything talks to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
  pub url:           Option<String>,
  pub api_key:       Option<String>,
  pub push_debounce: Duration,
  pub pull_debounce: Duration,
  pub poll_interval: Duration
}

impl SyncConfig {
  pub fn timings(&self) -> SyncTimings {
    SyncTimings {
      push_debounce: self.push_debounce,
      pull_debounce: self.pull_debounce
    }
  }

  pub fn endpoint(
    &self
  ) -> Option<(&str, &str)> {
    match (&self.url, &self.api_key) {
      | (Some(url), Some(key)) => {
        Some((url.as_str(), key.as_str()))
      }
      | _ => None
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
  pub period: Duration
}

impl Config {
  fn with_defaults() -> Self {
    let map = DEFAULTS
      .iter()
      .map(|(k, v)| {
        (k.to_string(), v.to_string())
      })
      .collect();
    Config {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::with_defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rcfile = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .filter(|v| !v.is_empty())
      .cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Parse `key`, falling back to
  /// `default` with a warning when the
  /// value is malformed.
  pub fn get_parsed<T>(
    &self,
    key: &str,
    default: T
  ) -> T
  where
    T: FromStr
  {
    let Some(raw) = self.get(key) else {
      return default;
    };
    match raw.trim().parse::<T>() {
      | Ok(value) => value,
      | Err(_) => {
        warn!(
          key,
          value = %raw,
          "invalid config value; using default"
        );
        default
      }
    }
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn sync(&self) -> SyncConfig {
    SyncConfig {
      url:           self.get("sync.url"),
      api_key:       self
        .get("sync.apikey"),
      push_debounce:
        Duration::from_millis(
          self.get_parsed(
            "sync.debounce_ms",
            2000
          )
        ),
      pull_debounce:
        Duration::from_millis(
          self.get_parsed(
            "sync.pull_debounce_ms",
            500
          )
        ),
      poll_interval:
        Duration::from_secs(
          self
            .get_parsed(
              "sync.poll_seconds",
              30_u64
            )
            .max(1)
        )
    }
  }

  pub fn tick(&self) -> TickConfig {
    TickConfig {
      period: Duration::from_secs(
        self
          .get_parsed(
            "tick.seconds",
            60_u64
          )
          .max(1)
      )
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = match raw_line
        .split_once('#')
      {
        | Some((before, _)) => {
          before.trim()
        }
        | None => raw_line.trim()
      };
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
          file = %path.display(),
          include = %include_path.display(),
          line = line_num + 1,
          "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      let raw = cfg
        .get("data.location")
        .unwrap_or_else(|| {
          DEFAULT_DATA_DIR.to_string()
        });
      expand_tilde(Path::new(&raw))
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
