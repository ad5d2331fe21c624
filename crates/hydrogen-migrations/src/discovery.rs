//! Migration source resolution and ordering.

use std::path::PathBuf;

use hydrogen_errors::Error;

/// Where migration files come from, parsed from the `migrations` config
/// knob.
#[derive(Debug, Clone)]
pub enum Source {
    /// `PAYLOAD:<name>` — resolved against an embedded asset store.
    Payload(String),
    /// `PATH:<dir>` — resolved against the filesystem.
    Path(PathBuf),
}

impl Source {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if let Some(name) = raw.strip_prefix("PAYLOAD:") {
            return Ok(Self::Payload(name.to_string()));
        }
        if let Some(dir) = raw.strip_prefix("PATH:") {
            return Ok(Self::Path(PathBuf::from(dir)));
        }
        Err(Error::invalid_input(format!("unrecognized migration source '{raw}'")))
    }
}

/// Supplies the contents of a `PAYLOAD:<name>` source, e.g. assets embedded
/// into the server binary at build time. Filesystem sources don't need one.
pub trait AssetStore: Send + Sync {
    fn list(&self, payload_name: &str) -> Result<Vec<(String, String)>, Error>;
}

/// A discovered migration file: name, raw Lua source, and the ordinal
/// parsed from its trailing `_<digits>` basename component.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub name: String,
    pub contents: String,
    pub ordinal: u32,
}

/// Resolves `source` to its migration files, sorted by the stable ordinal
/// sort: trailing numeric component ascending, ties break
/// on full-filename lexicographic order.
pub fn discover(source: &Source, assets: Option<&dyn AssetStore>) -> Result<Vec<MigrationFile>, Error> {
    let raw_files = match source {
        Source::Payload(name) => {
            let store = assets
                .ok_or_else(|| Error::internal("no asset store configured for a PAYLOAD migration source"))?;
            store.list(name)?
        }
        Source::Path(dir) => read_directory(dir)?,
    };

    let mut files: Vec<MigrationFile> = raw_files
        .into_iter()
        .map(|(name, contents)| {
            let ordinal = trailing_ordinal(&name);
            MigrationFile { name, contents, ordinal }
        })
        .collect();

    files.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

fn read_directory(dir: &std::path::Path) -> Result<Vec<(String, String)>, Error> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| Error::internal(format!("reading '{}': {e}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::internal(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("lua") {
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let contents = std::fs::read_to_string(&path).map_err(|e| Error::internal(format!("reading '{name}': {e}")))?;
        files.push((name, contents));
    }
    Ok(files)
}

/// Parses the trailing `_<digits>` basename component, ignoring the
/// extension. Files with no such suffix sort first, at ordinal 0.
fn trailing_ordinal(filename: &str) -> u32 {
    let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    match stem.rsplit_once('_') {
        Some((_, suffix)) => suffix.parse().unwrap_or(0),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payload_and_path_sources() {
        assert!(matches!(Source::parse("PAYLOAD:core").unwrap(), Source::Payload(ref n) if n == "core"));
        assert!(matches!(Source::parse("PATH:/var/migrations").unwrap(), Source::Path(ref p) if p.to_str() == Some("/var/migrations")));
        assert!(Source::parse("nonsense").is_err());
    }

    #[test]
    fn trailing_ordinal_parses_suffix() {
        assert_eq!(trailing_ordinal("create_accounts_1.lua"), 1);
        assert_eq!(trailing_ordinal("add_index_42.lua"), 42);
        assert_eq!(trailing_ordinal("bootstrap.lua"), 0);
    }

    struct FakeAssets;
    impl AssetStore for FakeAssets {
        fn list(&self, _payload_name: &str) -> Result<Vec<(String, String)>, Error> {
            Ok(vec![
                ("create_accounts_2.lua".into(), String::new()),
                ("create_accounts_10.lua".into(), String::new()),
                ("create_accounts_1.lua".into(), String::new()),
            ])
        }
    }

    #[test]
    fn discover_sorts_by_numeric_ordinal_not_lexicographically() {
        let files = discover(&Source::Payload("core".into()), Some(&FakeAssets)).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["create_accounts_1.lua", "create_accounts_2.lua", "create_accounts_10.lua"]);
    }
}
