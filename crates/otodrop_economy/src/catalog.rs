//! # Catalog
//!
//! Static registry of item and case definitions.
//!
//! The catalog is built once at process start and is immutable afterwards;
//! share it behind an `Arc` without further synchronization. Any defect in the
//! source data (non-positive price, unknown color, dangling item reference,
//! empty case, weight outside (0, 100]) is a [`CatalogError`] and the engine
//! refuses to start.
//!
//! ## Identity and order
//!
//! Items receive sequential ids starting at 1 in declaration order, which is
//! how case rows reference them. Case contents keep their declared order
//! because the resolver uses it as a tie-break.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use otodrop_shared::catalog_data::{reference_case_rows, CaseRow, REFERENCE_ITEM_ROWS};

use crate::credits::Credits;
use crate::error::{CatalogError, EconomyError, EconomyResult};
use crate::resolver::{self, Chance, Roll, Weighted};

/// Identifier of an item definition (1-based declaration index).
pub type ItemId = u32;

/// Rarity tier, ordered from least to most valuable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Rarity {
    /// `#4b69ff`
    Blue = 0,
    /// `#8847ff`
    Purple = 1,
    /// `#d32ee6`
    Pink = 2,
    /// `#eb4b4b`
    Red = 3,
    /// `#ebca44`, and the contraband tint `#e4ae39`
    Gold = 4,
}

impl Rarity {
    /// Maps a color code to its tier. Matching ignores case and surrounding
    /// whitespace; unmapped colors return `None`.
    #[must_use]
    pub fn from_color(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "#4b69ff" => Some(Self::Blue),
            "#8847ff" => Some(Self::Purple),
            "#d32ee6" => Some(Self::Pink),
            "#eb4b4b" => Some(Self::Red),
            "#ebca44" | "#e4ae39" => Some(Self::Gold),
            _ => None,
        }
    }

    /// Lowercase tier name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::Pink => "pink",
            Self::Red => "red",
            Self::Gold => "gold",
        }
    }
}

/// An immutable catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Sequential id assigned at build time.
    pub id: ItemId,
    /// Weapon (or glove/knife) class, e.g. `"AK-47"`.
    pub weapon_class: String,
    /// Finish name, e.g. `"Redline"`.
    pub variant_name: String,
    /// `"{weapon_class} | {variant_name}"`.
    pub display_name: String,
    /// Catalog price.
    pub price: Credits,
    /// Tier derived from `color`.
    pub rarity: Rarity,
    /// Source color code.
    pub color: String,
    /// Opaque image URI for the display layer.
    pub image_ref: String,
}

/// One item row as authored in source data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItemRow {
    /// Weapon class.
    pub weapon_class: String,
    /// Variant name.
    pub variant_name: String,
    /// Price as decimal text.
    pub price: String,
    /// Color code, e.g. `"#eb4b4b"`.
    pub color: String,
}

impl RawItemRow {
    /// Parses pipe-delimited rows (`weaponClass|variantName|price|colorCode`),
    /// skipping blank lines.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::MalformedRow` for a line without exactly four fields.
    pub fn parse_rows(text: &str) -> Result<Vec<Self>, CatalogError> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(index, line)| {
                let fields: Vec<&str> = line.split('|').map(str::trim).collect();
                match fields.as_slice() {
                    [weapon, variant, price, color] if !weapon.is_empty() && !variant.is_empty() => {
                        Ok(Self {
                            weapon_class: (*weapon).to_string(),
                            variant_name: (*variant).to_string(),
                            price: (*price).to_string(),
                            color: (*color).to_string(),
                        })
                    }
                    _ => Err(CatalogError::MalformedRow {
                        row: index + 1,
                        line: line.to_string(),
                    }),
                }
            })
            .collect()
    }
}

/// Validated mapping `id -> ItemDefinition`, iterated in declaration order.
#[derive(Clone, Debug, Default)]
pub struct ItemCatalog {
    items: BTreeMap<ItemId, ItemDefinition>,
}

impl ItemCatalog {
    /// Looks up an item.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(&id)
    }

    /// All items in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no items are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Derives the image URI the display layer uses for an item.
fn image_ref(weapon_class: &str, variant_name: &str) -> String {
    let folder = if weapon_class.contains("Gloves") || weapon_class.contains("Wraps") {
        "gloves"
    } else if ["Knife", "Karambit", "Bayonet", "Daggers"]
        .iter()
        .any(|kind| weapon_class.contains(kind))
    {
        "knives"
    } else {
        "skins"
    };
    let weapon = weapon_class.replace(' ', "_");
    let variant = variant_name.replace(' ', "_").replace('\'', "");
    format!("https://www.csgodatabase.com/images/{folder}/webp/{weapon}_{variant}.webp")
}

/// Parses a price that must be strictly positive.
fn positive_price(subject: &str, text: &str) -> Result<Credits, CatalogError> {
    match text.parse::<Credits>() {
        Ok(price) if !price.is_zero() => Ok(price),
        _ => Err(CatalogError::InvalidPrice {
            subject: subject.to_string(),
            price: text.to_string(),
        }),
    }
}

/// Builds the item registry from raw rows.
///
/// # Errors
///
/// Returns `CatalogError` if any row has a non-positive price or an
/// unrecognized color code.
pub fn build_catalog(rows: &[RawItemRow]) -> Result<ItemCatalog, CatalogError> {
    let mut items = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 1;
        let price = positive_price(&format!("item row {row_number}"), &row.price)?;
        let rarity = Rarity::from_color(&row.color).ok_or_else(|| CatalogError::UnknownColor {
            row: row_number,
            color: row.color.clone(),
        })?;

        let id = ItemId::try_from(row_number).map_err(|_| CatalogError::MalformedRow {
            row: row_number,
            line: row.weapon_class.clone(),
        })?;

        items.insert(
            id,
            ItemDefinition {
                id,
                weapon_class: row.weapon_class.clone(),
                variant_name: row.variant_name.clone(),
                display_name: format!("{} | {}", row.weapon_class, row.variant_name),
                price,
                rarity,
                color: row.color.trim().to_ascii_lowercase(),
                image_ref: image_ref(&row.weapon_class, &row.variant_name),
            },
        );
    }

    Ok(ItemCatalog { items })
}

// =============================================================================
// Cases
// =============================================================================

/// One weighted entry of a case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseEntry {
    /// The item that may drop.
    pub item: ItemId,
    /// Its weight, in (0%, 100%].
    pub weight: Chance,
}

impl Weighted for CaseEntry {
    fn weight(&self) -> Chance {
        self.weight
    }
}

/// An immutable, priced lottery over item definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Stable case id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Price to open.
    pub price: Credits,
    /// Accent label for the display layer.
    pub accent: String,
    /// Cover image, taken from the cover item when one is declared.
    pub cover_image: Option<String>,
    /// Weighted contents in declaration order; never empty.
    pub contents: Vec<CaseEntry>,
}

impl CaseDefinition {
    /// Sum of all declared weights (may differ from 100%).
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.contents
            .iter()
            .map(|entry| u64::from(entry.weight.millipercent()))
            .sum()
    }
}

/// Validates case rows against the item registry.
///
/// # Errors
///
/// Returns `CatalogError` for unknown item ids, empty contents, weights
/// outside (0, 100], non-positive prices or duplicate case ids.
pub fn register_cases(
    rows: &[CaseRow],
    items: &ItemCatalog,
) -> Result<Vec<CaseDefinition>, CatalogError> {
    let mut seen = HashSet::new();
    let mut cases = Vec::with_capacity(rows.len());

    for row in rows {
        if !seen.insert(row.id.clone()) {
            return Err(CatalogError::DuplicateCase(row.id.clone()));
        }
        if row.contents.is_empty() {
            return Err(CatalogError::EmptyCase(row.id.clone()));
        }

        let price = positive_price(&format!("case {}", row.id), &row.price)?;

        let mut contents = Vec::with_capacity(row.contents.len());
        for content in &row.contents {
            if items.get(content.item).is_none() {
                return Err(CatalogError::UnknownItem {
                    case_id: row.id.clone(),
                    item_id: content.item,
                });
            }
            let weight = match content.chance.parse::<Chance>() {
                Ok(w) if !w.is_zero() && w <= Chance::CERTAIN => w,
                _ => {
                    return Err(CatalogError::InvalidWeight {
                        case_id: row.id.clone(),
                        weight: content.chance.clone(),
                    })
                }
            };
            contents.push(CaseEntry {
                item: content.item,
                weight,
            });
        }

        let cover_image = match row.cover_item {
            Some(id) => Some(
                items
                    .get(id)
                    .ok_or_else(|| CatalogError::UnknownItem {
                        case_id: row.id.clone(),
                        item_id: id,
                    })?
                    .image_ref
                    .clone(),
            ),
            None => None,
        };

        cases.push(CaseDefinition {
            id: row.id.clone(),
            display_name: row.name.clone(),
            price,
            accent: row.accent.clone(),
            cover_image,
            contents,
        });
    }

    Ok(cases)
}

// =============================================================================
// Catalog
// =============================================================================

/// TOML catalog document: `[[items]]` rows followed by `[[cases]]` rows.
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    items: Vec<RawItemRow>,
    #[serde(default)]
    cases: Vec<CaseRow>,
}

/// The validated, read-only catalog.
#[derive(Clone, Debug)]
pub struct Catalog {
    items: ItemCatalog,
    cases: Vec<CaseDefinition>,
}

impl Catalog {
    /// Builds a catalog from item rows and case rows.
    ///
    /// # Errors
    ///
    /// Returns the first `CatalogError` found.
    pub fn build(item_rows: &[RawItemRow], case_rows: &[CaseRow]) -> Result<Self, CatalogError> {
        let items = build_catalog(item_rows)?;
        let cases = register_cases(case_rows, &items)?;
        Ok(Self { items, cases })
    }

    /// Builds the reference catalog shipped in `otodrop_shared`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the shipped data is invalid.
    pub fn reference() -> Result<Self, CatalogError> {
        let rows = RawItemRow::parse_rows(REFERENCE_ITEM_ROWS)?;
        Self::build(&rows, &reference_case_rows())
    }

    /// Parses a TOML catalog document.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Document` for TOML errors, or any validation error.
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument =
            toml::from_str(text).map_err(|e| CatalogError::Document(e.to_string()))?;
        Self::build(&document.items, &document.cases)
    }

    /// Loads a TOML catalog document from disk.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if the file cannot be read, or
    /// `EconomyError::Catalog` if it does not validate.
    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EconomyError::InvalidConfig(format!("failed to read catalog {}: {e}", path.display()))
        })?;
        Ok(Self::from_toml_str(&text)?)
    }

    /// Looks up an item.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(id)
    }

    /// The item registry.
    #[must_use]
    pub fn items(&self) -> &ItemCatalog {
        &self.items
    }

    /// Looks up a case.
    #[must_use]
    pub fn case(&self, id: &str) -> Option<&CaseDefinition> {
        self.cases.iter().find(|case| case.id == id)
    }

    /// All cases in declaration order.
    #[must_use]
    pub fn cases(&self) -> &[CaseDefinition] {
        &self.cases
    }

    /// Resolves the item a case yields for `roll`.
    ///
    /// Total for catalogs built through [`Catalog::build`]: contents are
    /// non-empty and every entry references a registered item.
    #[must_use]
    pub fn resolve_case(&self, case: &CaseDefinition, roll: Roll) -> Option<&ItemDefinition> {
        resolver::resolve(&case.contents, roll).and_then(|entry| self.item(entry.item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otodrop_shared::catalog_data::ContentRow;

    fn row(weapon: &str, variant: &str, price: &str, color: &str) -> RawItemRow {
        RawItemRow {
            weapon_class: weapon.to_string(),
            variant_name: variant.to_string(),
            price: price.to_string(),
            color: color.to_string(),
        }
    }

    fn case_row(id: &str, contents: &[(u32, &str)]) -> CaseRow {
        CaseRow {
            id: id.to_string(),
            name: id.to_uppercase(),
            price: "1.00".to_string(),
            accent: String::new(),
            cover_item: None,
            contents: contents
                .iter()
                .map(|&(item, chance)| ContentRow {
                    item,
                    chance: chance.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_reference_catalog_builds() {
        let catalog = Catalog::reference().unwrap();
        assert_eq!(catalog.items().len(), 81);
        assert_eq!(catalog.cases().len(), 3);

        let first = catalog.item(1).unwrap();
        assert_eq!(first.display_name, "P250 | Sand Dune");
        assert_eq!(first.price.cents(), 10);
        assert_eq!(first.rarity, Rarity::Blue);

        let howl = catalog.items().iter().find(|i| i.variant_name == "Howl").unwrap();
        assert_eq!(howl.rarity, Rarity::Gold);

        let budget = catalog.case("budget").unwrap();
        assert_eq!(budget.price.cents(), 499);
        assert_eq!(budget.total_weight(), 100_000);
        assert_eq!(budget.contents[0].item, 2);
    }

    #[test]
    fn test_ids_follow_declaration_order() {
        let items = build_catalog(&[
            row("AWP", "Asiimov", "110.00", "#eb4b4b"),
            row("Glock-18", "Fade", "800.00", "#8847ff"),
        ])
        .unwrap();
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(items.get(2).unwrap().rarity, Rarity::Purple);
    }

    #[test]
    fn test_rarity_order() {
        assert!(Rarity::Blue < Rarity::Purple);
        assert!(Rarity::Purple < Rarity::Pink);
        assert!(Rarity::Pink < Rarity::Red);
        assert!(Rarity::Red < Rarity::Gold);
        assert_eq!(Rarity::from_color(" #EB4B4B "), Some(Rarity::Red));
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let err = build_catalog(&[row("P250", "Sand Dune", "0.00", "#4b69ff")]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPrice { .. }));
        let err = build_catalog(&[row("P250", "Sand Dune", "-1.00", "#4b69ff")]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPrice { .. }));
    }

    #[test]
    fn test_rejects_unknown_color() {
        let err = build_catalog(&[row("P250", "Sand Dune", "0.10", "#123456")]).unwrap_err();
        assert_eq!(
            err,
            CatalogError::UnknownColor {
                row: 1,
                color: "#123456".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_case_item() {
        let items = build_catalog(&[row("P250", "Sand Dune", "0.10", "#4b69ff")]).unwrap();
        let err = register_cases(&[case_row("c", &[(1, "50"), (2, "50")])], &items).unwrap_err();
        assert_eq!(
            err,
            CatalogError::UnknownItem {
                case_id: "c".to_string(),
                item_id: 2
            }
        );
    }

    #[test]
    fn test_rejects_empty_and_bad_weights() {
        let items = build_catalog(&[row("P250", "Sand Dune", "0.10", "#4b69ff")]).unwrap();
        assert_eq!(
            register_cases(&[case_row("empty", &[])], &items).unwrap_err(),
            CatalogError::EmptyCase("empty".to_string())
        );
        for bad in ["0", "100.001", "abc"] {
            let err = register_cases(&[case_row("w", &[(1, bad)])], &items).unwrap_err();
            assert!(matches!(err, CatalogError::InvalidWeight { .. }), "{bad}");
        }
        assert!(register_cases(&[case_row("full", &[(1, "100")])], &items).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_case() {
        let items = build_catalog(&[row("P250", "Sand Dune", "0.10", "#4b69ff")]).unwrap();
        let err =
            register_cases(&[case_row("a", &[(1, "10")]), case_row("a", &[(1, "10")])], &items)
                .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateCase("a".to_string()));
    }

    #[test]
    fn test_malformed_rows() {
        let err = RawItemRow::parse_rows("AK-47|Redline|15.00\n").unwrap_err();
        assert!(matches!(err, CatalogError::MalformedRow { row: 1, .. }));
    }

    #[test]
    fn test_image_ref_folders() {
        assert!(image_ref("Karambit", "Fade").contains("/knives/"));
        assert!(
            image_ref("Sport Gloves", "Pandora's Box").ends_with("Sport_Gloves_Pandoras_Box.webp")
        );
        assert!(image_ref("AK-47", "Redline").contains("/skins/"));
    }

    #[test]
    fn test_toml_document() {
        let catalog = Catalog::from_toml_str(
            r##"
            [[items]]
            weapon_class = "AK-47"
            variant_name = "Redline"
            price = "15.00"
            color = "#d32ee6"

            [[items]]
            weapon_class = "AWP"
            variant_name = "Asiimov"
            price = "110.00"
            color = "#eb4b4b"

            [[cases]]
            id = "mini"
            name = "Mini"
            price = "9.99"
            contents = [ { item = 1, chance = "90" }, { item = 2, chance = "10" } ]
            "##,
        )
        .unwrap();
        let mini = catalog.case("mini").unwrap();
        assert_eq!(catalog.resolve_case(mini, Roll::MAX).unwrap().variant_name, "Asiimov");
    }
}
