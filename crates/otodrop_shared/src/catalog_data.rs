//! # Reference Catalog Rows
//!
//! Static source data for the reference catalog.
//!
//! Item rows are `weaponClass|variantName|price|colorCode`, one per line.
//! **Row order is part of the contract**: items receive sequential ids
//! starting at 1 in declaration order, and case rows reference items by
//! those ids. Reordering rows silently changes every case.

use serde::{Deserialize, Serialize};

/// Pipe-delimited item rows in declaration order.
pub const REFERENCE_ITEM_ROWS: &str = "
P250|Sand Dune|0.10|#4b69ff
Glock-18|Catacombs|0.20|#4b69ff
SSG 08|Abyss|0.50|#4b69ff
P90|Grim|0.80|#4b69ff
M4A4|Magnesium|1.00|#4b69ff
MAC-10|Candy Apple|1.10|#4b69ff
Glock-18|Weasel|1.20|#8847ff
Glock-18|Moonrise|1.50|#8847ff
USP-S|Ticket to Hell|1.80|#8847ff
P250|Asiimov|2.00|#d32ee6
AK-47|Elite Build|2.50|#4b69ff
M4A1-S|Night Terror|2.50|#8847ff
AWP|Worm God|3.00|#8847ff
USP-S|Cyrex|3.50|#8847ff
AK-47|Slate|4.00|#8847ff
Desert Eagle|Light Rail|4.00|#8847ff
AWP|Mortis|4.50|#d32ee6
Glock-18|Water Elemental|5.00|#d32ee6
USP-S|Cortex|5.00|#d32ee6
Desert Eagle|Conspiracy|6.00|#d32ee6
AK-47|Phantom Disruptor|6.00|#d32ee6
Desert Eagle|Mecha Industries|7.00|#d32ee6
MAC-10|Neon Rider|8.00|#eb4b4b
AWP|Atheris|10.00|#8847ff
M4A4|Desolate Space|10.00|#d32ee6
Glock-18|Bullet Queen|12.00|#eb4b4b
FAMAS|Commemoration|12.00|#eb4b4b
M4A1-S|Decimator|14.00|#d32ee6
AK-47|Redline|15.00|#d32ee6
Glock-18|Neo-Noir|15.00|#eb4b4b
M4A4|In Living Color|15.00|#eb4b4b
AK-47|Ice Coaled|18.00|#d32ee6
USP-S|Neo-Noir|18.00|#eb4b4b
M4A4|Neo-Noir|20.00|#eb4b4b
AWP|Neo-Noir|25.00|#eb4b4b
USP-S|Orion|25.00|#d32ee6
M4A1-S|Hyper Beast|25.00|#eb4b4b
M4A4|The Emperor|30.00|#eb4b4b
AK-47|Asiimov|35.00|#eb4b4b
M4A1-S|Player Two|35.00|#eb4b4b
AK-47|Neon Rider|40.00|#eb4b4b
USP-S|Kill Confirmed|45.00|#eb4b4b
USP-S|Printstream|55.00|#eb4b4b
Desert Eagle|Printstream|60.00|#eb4b4b
AK-47|Bloodsport|75.00|#eb4b4b
AK-47|Vulcan|80.00|#eb4b4b
AWP|Containment Breach|85.00|#eb4b4b
AWP|Asiimov|110.00|#eb4b4b
M4A1-S|Printstream|210.00|#eb4b4b
Desert Eagle|Emerald Jörmungandr|350.00|#8847ff
Bayonet|Slaughter|450.00|#ebca44
M4A1-S|Blue Phosphor|700.00|#d32ee6
Glock-18|Fade|800.00|#8847ff
Desert Eagle|Blaze|900.00|#8847ff
M9 Bayonet|Doppler|900.00|#ebca44
Talon Knife|Fade|1000.00|#ebca44
Karambit|Tiger Tooth|1000.00|#ebca44
Karambit|Doppler|1100.00|#ebca44
Karambit|Fade|1200.00|#ebca44
M9 Bayonet|Lore|1200.00|#ebca44
Driver Gloves|King Snake|1200.00|#ebca44
Karambit|Marble Fade|1300.00|#ebca44
Butterfly Knife|Slaughter|1400.00|#ebca44
Karambit|Lore|1500.00|#ebca44
M9 Bayonet|Autotronic|1500.00|#ebca44
Butterfly Knife|Doppler|1600.00|#ebca44
Skeleton Knife|Crimson Web|1600.00|#ebca44
Butterfly Knife|Tiger Tooth|1700.00|#ebca44
M9 Bayonet|Crimson Web|1800.00|#ebca44
Skeleton Knife|Fade|1800.00|#ebca44
Butterfly Knife|Marble Fade|2000.00|#ebca44
Sport Gloves|Vice|2000.00|#ebca44
Butterfly Knife|Fade|2200.00|#ebca44
M4A1-S|Welcome to the Jungle|2500.00|#eb4b4b
AWP|Medusa|3000.00|#eb4b4b
AK-47|Gold Arabesque|3000.00|#eb4b4b
M4A4|Howl|3500.00|#e4ae39
Sport Gloves|Pandora's Box|4000.00|#ebca44
AK-47|Wild Lotus|4500.00|#eb4b4b
AWP|Dragon Lore|5000.00|#eb4b4b
AWP|Gungnir|6000.00|#eb4b4b
";

/// One weighted entry of a case row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRow {
    /// 1-based item id (declaration index in the item rows).
    pub item: u32,
    /// Weight as a decimal percentage, e.g. `"2.5"`.
    pub chance: String,
}

/// A case as authored in source data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRow {
    /// Stable case identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Price as a decimal string, e.g. `"4.99"`.
    pub price: String,
    /// Accent color label used by the display layer.
    #[serde(default)]
    pub accent: String,
    /// Item whose image is used as the case cover (1-based id).
    #[serde(default)]
    pub cover_item: Option<u32>,
    /// Weighted contents in declaration order.
    pub contents: Vec<ContentRow>,
}

/// Static description of a reference case: `(id, name, price, accent, cover, contents)`.
type StaticCase = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    u32,
    &'static [(u32, &'static str)],
);

/// Reference cases. Weights are authored percentages and are NOT required to
/// sum to exactly 100.
pub const REFERENCE_CASES: &[StaticCase] = &[
    (
        "budget",
        "Budget Grinder",
        "4.99",
        "blue",
        13,
        &[(2, "60"), (9, "25"), (17, "12"), (25, "2.5"), (29, "0.5")],
    ),
    (
        "covert",
        "Covert Dreams",
        "99.00",
        "red",
        48,
        &[(38, "65"), (46, "25"), (48, "8"), (50, "2")],
    ),
    (
        "knife-ultra",
        "Ultra Knife Box",
        "499.00",
        "gold",
        59,
        &[(55, "30"), (73, "25"), (57, "20"), (59, "15"), (56, "10")],
    ),
];

/// Expands [`REFERENCE_CASES`] into owned [`CaseRow`]s.
#[must_use]
pub fn reference_case_rows() -> Vec<CaseRow> {
    REFERENCE_CASES
        .iter()
        .map(|&(id, name, price, accent, cover, contents)| CaseRow {
            id: id.to_string(),
            name: name.to_string(),
            price: price.to_string(),
            accent: accent.to_string(),
            cover_item: Some(cover),
            contents: contents
                .iter()
                .map(|&(item, chance)| ContentRow {
                    item,
                    chance: chance.to_string(),
                })
                .collect(),
        })
        .collect()
}
