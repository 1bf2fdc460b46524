//! Ticker universes: index, sector and custom list files

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniverseKind {
    Index,
    Sector,
    Custom,
}

/// A named ticker list on disk
#[derive(Debug, Clone, Serialize)]
pub struct Universe {
    pub kind: UniverseKind,
    /// File stem, e.g. `sector_defence`
    pub name: String,
    /// Display label, e.g. `DEFENCE`
    pub label: String,
    pub path: PathBuf,
}

impl Universe {
    pub fn from_path(kind: UniverseKind, path: PathBuf) -> Option<Self> {
        let name = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            kind,
            label: label_for(&name),
            name,
            path,
        })
    }

    pub fn tickers(&self) -> anyhow::Result<Vec<String>> {
        load_tickers(&self.path)
    }
}

/// `sector_ev_newage` -> `EV_NEWAGE`, `nifty50` -> `NIFTY50`
pub fn label_for(stem: &str) -> String {
    stem.strip_prefix("sector_")
        .unwrap_or(stem)
        .to_uppercase()
}

/// Parse a headerless ticker list: first column, quotes and commas stripped, blanks dropped
pub fn parse_tickers(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let first = line.split(',').next().unwrap_or("");
            let ticker: String = first
                .trim()
                .chars()
                .filter(|c| *c != '"' && *c != ',')
                .collect();
            let ticker = ticker.trim().to_string();
            (!ticker.is_empty()).then_some(ticker)
        })
        .collect()
}

pub fn load_tickers(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("could not read ticker list {:?}: {}", path, e))?;
    let tickers = parse_tickers(&raw);
    if tickers.is_empty() {
        tracing::warn!("Ticker list {:?} is empty", path);
    }
    Ok(tickers)
}

fn list_csv_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("csv"))
        .collect();
    files.sort();
    files
}

/// All universes of one kind, sorted by file name
pub fn discover(config: &Config, kind: UniverseKind) -> Vec<Universe> {
    let dir = match kind {
        UniverseKind::Index => &config.index_dir,
        UniverseKind::Sector => &config.sector_dir,
        UniverseKind::Custom => &config.custom_dir,
    };
    list_csv_files(dir)
        .into_iter()
        .filter_map(|p| Universe::from_path(kind, p))
        .collect()
}

pub fn discover_all(config: &Config) -> Vec<Universe> {
    [UniverseKind::Index, UniverseKind::Sector, UniverseKind::Custom]
        .into_iter()
        .flat_map(|kind| discover(config, kind))
        .collect()
}

/// Resolve a user-supplied selector: a path, a file stem, or a label
pub fn resolve(config: &Config, selector: &str) -> Option<Universe> {
    let as_path = PathBuf::from(selector);
    if as_path.is_file() {
        return Universe::from_path(UniverseKind::Custom, as_path);
    }

    let wanted = selector.trim_end_matches(".csv");
    discover_all(config)
        .into_iter()
        .find(|u| u.name.eq_ignore_ascii_case(wanted) || u.label.eq_ignore_ascii_case(wanted))
}

/// Unique tickers across the given universes, sorted
pub fn collect_tickers(universes: &[Universe]) -> Vec<String> {
    let mut all = BTreeSet::new();
    for universe in universes {
        match universe.tickers() {
            Ok(tickers) => all.extend(tickers),
            Err(e) => tracing::warn!("Error reading {:?}: {}", universe.path, e),
        }
    }
    all.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headerless_list() {
        let raw = "\"RELIANCE.NS\"\n TCS.NS ,extra\n\n\"\",\nINFY.NS\n";
        assert_eq!(parse_tickers(raw), vec!["RELIANCE.NS", "TCS.NS", "INFY.NS"]);
    }

    #[test]
    fn labels_strip_sector_prefix() {
        assert_eq!(label_for("sector_ev_newage"), "EV_NEWAGE");
        assert_eq!(label_for("microcap250"), "MICROCAP250");
    }

    #[test]
    fn discovers_and_resolves_universes() {
        let root = tempfile::tempdir().unwrap();
        let index_dir = root.path().join("INDEX CSV");
        let sector_dir = root.path().join("SECTORS CSV");
        fs::create_dir_all(&index_dir).unwrap();
        fs::create_dir_all(&sector_dir).unwrap();
        fs::write(index_dir.join("nifty50.csv"), "RELIANCE.NS\nTCS.NS\n").unwrap();
        fs::write(sector_dir.join("sector_it.csv"), "TCS.NS\nINFY.NS\n").unwrap();
        fs::write(sector_dir.join("readme.txt"), "ignored").unwrap();

        let config = Config {
            index_dir,
            sector_dir,
            custom_dir: root.path().to_path_buf(),
            ..Config::default()
        };

        let sectors = discover(&config, UniverseKind::Sector);
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].label, "IT");

        let it = resolve(&config, "it").unwrap();
        assert_eq!(it.name, "sector_it");
        assert!(resolve(&config, "nifty50.csv").is_some());
        assert!(resolve(&config, "banking").is_none());

        let all = collect_tickers(&discover_all(&config));
        assert_eq!(all, vec!["INFY.NS", "RELIANCE.NS", "TCS.NS"]);
    }
}
