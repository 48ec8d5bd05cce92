use std::collections::{BTreeMap, HashSet};

use crate::error::{AppError, Result};
use crate::types::Exchange;

/// Canonical seat-row column names.
pub mod columns {
    pub const RANK: &str = "rank";
    pub const MEMBER_NAME: &str = "member_name";
    pub const VOLUME: &str = "vol";
    pub const LONG_PARTY: &str = "long_party_name";
    pub const LONG_OI: &str = "long_open_interest";
    pub const LONG_OI_CHG: &str = "long_open_interest_chg";
    pub const SHORT_PARTY: &str = "short_party_name";
    pub const SHORT_OI: &str = "short_open_interest";
    pub const SHORT_OI_CHG: &str = "short_open_interest_chg";
}

use columns::*;

pub const CANONICAL_COLUMNS: [&str; 9] = [
    RANK,
    MEMBER_NAME,
    VOLUME,
    LONG_PARTY,
    LONG_OI,
    LONG_OI_CHG,
    SHORT_PARTY,
    SHORT_OI,
    SHORT_OI_CHG,
];

/// A contract without all of these after renaming is skipped.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    LONG_PARTY,
    LONG_OI,
    LONG_OI_CHG,
    SHORT_PARTY,
    SHORT_OI,
    SHORT_OI_CHG,
    VOLUME,
];

/// CZCE publishes abbreviated headers; the duplicated ones carry a pandas-style `.1` suffix.
const CZCE_COLUMNS: &[(&str, &str)] = &[
    ("g_party_n", LONG_PARTY),
    ("open_inten", LONG_OI),
    ("inten_intert", LONG_OI_CHG),
    ("t_party_n", SHORT_PARTY),
    ("open_inten.1", SHORT_OI),
    ("inten_intert.1", SHORT_OI_CHG),
    ("vol_party_n", MEMBER_NAME),
    ("vol", VOLUME),
];

/// Shared English schema used by DCE, CFFEX, SHFE and GFEX.
const SHARED_COLUMNS: &[(&str, &str)] = &[("vol_party_name", MEMBER_NAME)];

/// Per-exchange `source column → canonical column` table.
#[derive(Debug, Clone)]
pub struct SchemaMap {
    maps: BTreeMap<Exchange, Vec<(String, String)>>,
}

impl SchemaMap {
    pub fn standard() -> Self {
        let to_owned = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(s, t)| (s.to_string(), t.to_string()))
                .collect::<Vec<_>>()
        };
        let maps = Exchange::ALL
            .into_iter()
            .map(|ex| {
                let pairs = match ex {
                    Exchange::Czce => to_owned(CZCE_COLUMNS),
                    _ => to_owned(SHARED_COLUMNS),
                };
                (ex, pairs)
            })
            .collect();
        Self { maps }
    }

    #[cfg(test)]
    pub fn from_pairs(maps: BTreeMap<Exchange, Vec<(String, String)>>) -> Self {
        Self { maps }
    }

    /// Every exchange must have a mapping and every target must be canonical.
    pub fn validate(&self) -> Result<()> {
        for ex in Exchange::ALL {
            let Some(pairs) = self.maps.get(&ex) else {
                return Err(AppError::Config(format!("no column mapping for {ex}")));
            };
            for (source, target) in pairs {
                if !CANONICAL_COLUMNS.contains(&target.as_str()) {
                    return Err(AppError::Config(format!(
                        "{ex} maps '{source}' to non-canonical column '{target}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rename `columns` to canonical names. Canonical names are never renamed, and a
    /// source column is left alone when its target already exists in the table.
    pub fn rename(&self, exchange: Exchange, columns: &[String]) -> Vec<String> {
        let Some(pairs) = self.maps.get(&exchange) else {
            return columns.to_vec();
        };
        let mut taken: HashSet<&str> = columns
            .iter()
            .map(String::as_str)
            .filter(|c| CANONICAL_COLUMNS.contains(c))
            .collect();

        columns
            .iter()
            .map(|col| {
                if CANONICAL_COLUMNS.contains(&col.as_str()) {
                    return col.clone();
                }
                match pairs.iter().find(|(source, _)| source == col) {
                    Some((_, target)) if !taken.contains(target.as_str()) => {
                        taken.insert(target.as_str());
                        target.clone()
                    }
                    _ => col.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn standard_map_validates() {
        assert!(SchemaMap::standard().validate().is_ok());
    }

    #[test]
    fn missing_exchange_fails_validation() {
        let mut maps = BTreeMap::new();
        maps.insert(Exchange::Dce, Vec::new());
        assert!(SchemaMap::from_pairs(maps).validate().is_err());
    }

    #[test]
    fn non_canonical_target_fails_validation() {
        let mut maps: BTreeMap<Exchange, Vec<(String, String)>> =
            Exchange::ALL.into_iter().map(|ex| (ex, Vec::new())).collect();
        maps.insert(Exchange::Czce, vec![("x".to_string(), "volume_total".to_string())]);
        assert!(SchemaMap::from_pairs(maps).validate().is_err());
    }

    #[test]
    fn czce_abbreviated_headers_map_to_canonical() {
        let renamed = SchemaMap::standard().rename(
            Exchange::Czce,
            &cols(&[
                "rank",
                "vol_party_n",
                "vol",
                "g_party_n",
                "open_inten",
                "inten_intert",
                "t_party_n",
                "open_inten.1",
                "inten_intert.1",
            ]),
        );
        assert_eq!(renamed, cols(&CANONICAL_COLUMNS));
    }

    #[test]
    fn canonical_headers_are_left_untouched() {
        let canonical = cols(&CANONICAL_COLUMNS);
        let schema = SchemaMap::standard();
        for ex in Exchange::ALL {
            assert_eq!(schema.rename(ex, &canonical), canonical);
        }
    }

    #[test]
    fn rename_does_not_shadow_existing_canonical_column() {
        let renamed = SchemaMap::standard()
            .rename(Exchange::Czce, &cols(&["long_open_interest", "open_inten"]));
        assert_eq!(renamed, cols(&["long_open_interest", "open_inten"]));
    }
}
