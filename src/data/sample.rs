use std::path::PathBuf;

use log::debug;

use super::vds::Manifest;
use crate::error::{Error, Result};

fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// A named set of containers given by a path or glob pattern, optionally
/// relative to an ntuple directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub pattern: String,
    pub ntuple_dir: Option<PathBuf>,
    pub name: Option<String>,
}

impl Sample {
    pub fn new(pattern: impl Into<String>) -> Self {
        Sample {
            pattern: pattern.into(),
            ntuple_dir: None,
            name: None,
        }
    }

    pub fn with_ntuple_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ntuple_dir = Some(dir.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn path(&self) -> PathBuf {
        match &self.ntuple_dir {
            Some(dir) => dir.join(&self.pattern),
            None => PathBuf::from(&self.pattern),
        }
    }

    /// Matching containers in lexical order. Manifests are expanded to the
    /// sources they list.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let path = self.path();
        let text = path.to_string_lossy().into_owned();
        let matched = if is_pattern(&text) {
            let mut paths = glob::glob(&text)?.collect::<std::result::Result<Vec<_>, _>>()?;
            paths.sort();
            paths
        } else if path.exists() {
            vec![path]
        } else {
            Vec::new()
        };
        if matched.is_empty() {
            return Err(Error::NoSources(text));
        }

        let mut files = Vec::with_capacity(matched.len());
        for p in matched {
            if Manifest::is_manifest(&p) {
                files.extend(Manifest::load(&p)?.sources);
            } else {
                files.push(p);
            }
        }
        debug!("resolved '{text}' to {} source(s)", files.len());
        Ok(files)
    }

    pub fn num_files(&self) -> Result<usize> {
        Ok(self.files()?.len())
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name.as_deref().unwrap_or(&self.pattern))
    }
}

/// Resolve each pattern in turn and concatenate the results.
pub fn resolve_sources<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    if patterns.is_empty() {
        return Err(Error::NoSources(String::from("<no patterns>")));
    }
    let mut files = Vec::new();
    for pattern in patterns {
        files.extend(Sample::new(pattern.as_ref()).files()?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a", "c"] {
            std::fs::create_dir(dir.path().join(format!("sample_{name}"))).unwrap();
        }
        let sample = Sample::new("sample_*").with_ntuple_dir(dir.path());
        let names: Vec<String> = sample
            .files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sample_a", "sample_b", "sample_c"]);
        assert_eq!(sample.num_files().unwrap(), 3);
    }

    #[test]
    fn no_match() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("nothing_*").to_string_lossy().into_owned();
        assert!(matches!(
            resolve_sources(&[pattern]),
            Err(Error::NoSources(_))
        ));
        let missing = dir.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(
            resolve_sources(&[missing]),
            Err(Error::NoSources(_))
        ));
    }

    #[test]
    fn display_prefers_name() {
        assert_eq!(Sample::new("a/*").to_string(), "a/*");
        assert_eq!(Sample::new("a/*").with_name("ttbar").to_string(), "ttbar");
    }
}
