//! Crop planning calculator.
//!
//! Turns retrieved wiki chunks for a crop into numeric attributes
//! ([`CropDetails`]) and then into a [`FarmPlan`] for a target harvest.
//!
//! ```text
//! hits ──▶ resolve_details ──▶ CropDetails ──▶ compute_plan ──▶ FarmPlan
//!              │                                    │
//!              └── PlanError::MissingData           └── SeasonMismatch / NotViable
//!                                                       ZeroYield / InvalidTarget
//! ```
//!
//! Resolution reads a page's infobox first and falls back to free-text
//! patterns for whatever is still missing. Hits are visited in rank order
//! and the first value found for a field wins. Resolution stops as soon
//! as yield, growth and seed price are all known.
//!
//! Plan arithmetic (season length 28 days):
//!
//! | Quantity | Formula |
//! |----------|---------|
//! | harvests | `1 + (28 - initial) / regrowth` (integer division; `1` without regrowth) |
//! | yield per plant | `((min + max) / 2) × harvests` |
//! | plants | `ceil(target / yield per plant)` |
//! | tiles | `plants` |
//! | seed cost | `plants × (min price, max price)` |

pub mod parse;

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::models::SearchHit;

pub use parse::{parse_growth_time, parse_price, parse_seasons, parse_yield, GrowthTime, Range};

/// Days in one in-game season.
pub const SEASON_LENGTH: u32 = 28;

/// Number of retrieval hits considered when planning.
pub const PLANNING_TOP_K: usize = 3;

static RE_TEXT_YIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)yields (\d+-\d+|\d+)").expect("yields regex"));
static RE_TEXT_YIELD_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)produces (\d+-\d+|\d+)", r"(?i)gives (\d+-\d+|\d+)"]
        .iter()
        .map(|p| Regex::new(p).expect("yield phrase regex"))
        .collect()
});
static RE_TEXT_SEED_PRICE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)pierre's general store:\s*data-sort-value="\d+">?(\d+)g"#,
        r#"(?i)general store:\s*data-sort-value="\d+">?(\d+)g"#,
        r#"(?i)jojamart:\s*data-sort-value="\d+">?(\d+)g"#,
        r#"(?i)traveling cart:\s*data-sort-value="\d+">?(\d+)g"#,
        r#"(?i)night market\s*\(winter 17\):\s*data-sort-value="\d+">?(\d+)g"#,
        r"(?i)seeds cost (\d+)g",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("seed price regex"))
    .collect()
});
static RE_TEXT_GROWTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)growth time:\s*(\d+)\s*days").expect("growth regex"));
static RE_TEXT_REGROWTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)regrowth:\s*(\d+)\s*days").expect("regrowth regex"));
static RE_TEXT_SEASONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)season[s]?: (.+)").expect("seasons regex"));

/// Why a plan could not be produced. `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Could not find sufficient detailed information for {crop}. Please ensure the wiki data contains yield, growth time, and seed price.")]
    MissingData { crop: String },

    #[error("{crop} does not grow in {season}. It grows in: {}.", list_or_na(.seasons))]
    SeasonMismatch {
        crop: String,
        season: String,
        seasons: Vec<String>,
    },

    #[error("Cannot plan for {crop} in {season}: it needs {initial_days} days to grow, which does not fit within the season length ({} days).", SEASON_LENGTH)]
    NotViable {
        crop: String,
        season: String,
        initial_days: u32,
    },

    #[error("Could not calculate a positive yield per plant per season for {crop}. Please check the data.")]
    ZeroYield { crop: String },

    #[error("Invalid target yield. Please provide a positive number.")]
    InvalidTarget,
}

fn list_or_na(seasons: &[String]) -> String {
    if seasons.is_empty() {
        "N/A".to_string()
    } else {
        seasons.join(", ")
    }
}

/// Numeric crop attributes resolved from the wiki.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropDetails {
    pub yield_per_harvest: Range,
    pub growth: GrowthTime,
    pub seed_price: Range,
    /// Lowercase season names.
    pub seasons: Vec<String>,
}

/// A computed planting plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FarmPlan {
    pub crop: String,
    pub season: String,
    pub target_yield: u32,
    pub plants: u64,
    pub tiles: u64,
    pub harvests_per_season: u32,
    pub yield_per_plant: u64,
    pub seed_cost_min: u64,
    pub seed_cost_max: u64,
    pub details: CropDetails,
}

/// Retrieval query used to find a crop's pages.
pub fn planning_query(crop: &str) -> String {
    format!(
        "{} Stardew Valley crop growth yield seed price season",
        crop
    )
}

#[derive(Default)]
struct Partial {
    yield_per_harvest: Option<Range>,
    growth: Option<GrowthTime>,
    seed_price: Option<Range>,
    seasons: Option<Vec<String>>,
}

impl Partial {
    fn complete(&self) -> bool {
        self.yield_per_harvest.is_some() && self.growth.is_some() && self.seed_price.is_some()
    }
}

/// Resolve crop attributes from ranked retrieval hits.
///
/// Only hits whose title contains `crop` (case-insensitive) are read.
pub fn resolve_details(crop: &str, hits: &[SearchHit]) -> Result<CropDetails, PlanError> {
    let needle = crop.trim().to_lowercase();
    let mut partial = Partial::default();

    for hit in hits {
        if !hit.metadata.title.to_lowercase().contains(&needle) {
            continue;
        }
        read_infobox(&mut partial, hit);
        read_text(&mut partial, &hit.content);
        if partial.complete() {
            break;
        }
    }

    match partial {
        Partial {
            yield_per_harvest: Some(yield_per_harvest),
            growth: Some(growth),
            seed_price: Some(seed_price),
            seasons,
        } => Ok(CropDetails {
            yield_per_harvest,
            growth,
            seed_price,
            seasons: seasons.unwrap_or_default(),
        }),
        _ => Err(PlanError::MissingData {
            crop: crop.to_string(),
        }),
    }
}

fn read_infobox(partial: &mut Partial, hit: &SearchHit) {
    let infobox = &hit.metadata.infobox;
    if infobox.is_empty() {
        return;
    }

    if partial.growth.is_none() {
        if let Some(growth) = infobox.get("Growth") {
            partial.growth = Some(parse_growth_time(growth));
        }
    }

    if partial.seasons.is_none() {
        let seasons = infobox
            .get("Seasons")
            .or_else(|| infobox.get("Season"))
            .map(|s| parse_seasons(s))
            .filter(|s| !s.is_empty());
        if seasons.is_some() {
            partial.seasons = seasons;
        }
    }

    if partial.seed_price.is_none() {
        let price = infobox
            .get("Seed Price")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                infobox.iter().find_map(|(key, value)| {
                    let key = key.to_lowercase();
                    let pricey =
                        key.contains("price") || key.contains("cost") || key.contains("g.store");
                    (pricey && !value.trim().is_empty()).then_some(value)
                })
            });
        if let Some(price) = price {
            partial.seed_price = Some(parse_price(price));
        }
    }
}

fn read_text(partial: &mut Partial, content: &str) {
    if partial.yield_per_harvest.is_none() {
        partial.yield_per_harvest = text_yield(content);
    }

    if partial.seed_price.is_none() {
        partial.seed_price = RE_TEXT_SEED_PRICE
            .iter()
            .find_map(|re| re.captures(content))
            .map(|caps| parse_price(&format!("{}g", &caps[1])));
    }

    if partial.growth.is_none() {
        if let Some(caps) = RE_TEXT_GROWTH.captures(content) {
            let initial_days = caps[1].parse().unwrap_or(0);
            let regrowth_days = RE_TEXT_REGROWTH
                .captures(content)
                .and_then(|c| c[1].parse().ok());
            partial.growth = Some(GrowthTime {
                initial_days,
                regrowth_days,
            });
        }
    }

    if partial.seasons.is_none() {
        partial.seasons = RE_TEXT_SEASONS
            .captures(content)
            .map(|caps| parse_seasons(&caps[1]))
            .filter(|s| !s.is_empty());
    }
}

fn text_yield(content: &str) -> Option<Range> {
    if let Some(caps) = RE_TEXT_YIELD.captures(content) {
        return Some(parse_yield(&caps[1]));
    }
    let lower = content.to_lowercase();
    if lower.contains("keeps producing after that") || lower.contains("regrowth") {
        return Some(Range::exact(1));
    }
    RE_TEXT_YIELD_PHRASES
        .iter()
        .find_map(|re| re.captures(content))
        .map(|caps| parse_yield(&caps[1]))
}

/// Compute the planting plan for `target_yield` units of `crop` in `season`.
pub fn compute_plan(
    crop: &str,
    target_yield: u32,
    season: &str,
    details: &CropDetails,
) -> Result<FarmPlan, PlanError> {
    if target_yield == 0 {
        return Err(PlanError::InvalidTarget);
    }

    let season_key = season.trim().to_lowercase();
    if !details.seasons.iter().any(|s| *s == season_key) {
        return Err(PlanError::SeasonMismatch {
            crop: crop.to_string(),
            season: season.to_string(),
            seasons: details.seasons.clone(),
        });
    }

    let initial = details.growth.initial_days;
    if initial == 0 || initial > SEASON_LENGTH {
        return Err(PlanError::NotViable {
            crop: crop.to_string(),
            season: season.to_string(),
            initial_days: initial,
        });
    }

    let harvests_per_season = match details.growth.regrowth_days {
        Some(regrowth) if regrowth > 0 => 1 + (SEASON_LENGTH - initial) / regrowth,
        _ => 1,
    };

    let y = details.yield_per_harvest;
    let avg_per_harvest = (u64::from(y.min) + u64::from(y.max)) / 2;
    let yield_per_plant = avg_per_harvest * u64::from(harvests_per_season);
    if yield_per_plant == 0 {
        return Err(PlanError::ZeroYield {
            crop: crop.to_string(),
        });
    }

    let plants = u64::from(target_yield).div_ceil(yield_per_plant);

    Ok(FarmPlan {
        crop: crop.to_string(),
        season: season_key,
        target_yield,
        plants,
        tiles: plants,
        harvests_per_season,
        yield_per_plant,
        seed_cost_min: plants * u64::from(details.seed_price.min),
        seed_cost_max: plants * u64::from(details.seed_price.max),
        details: details.clone(),
    })
}

/// Resolve details from `hits` and compute the plan in one step.
pub fn plan_from_hits(
    crop: &str,
    target_yield: u32,
    season: &str,
    hits: &[SearchHit],
) -> Result<FarmPlan, PlanError> {
    if target_yield == 0 {
        return Err(PlanError::InvalidTarget);
    }
    let details = resolve_details(crop, hits)?;
    compute_plan(crop, target_yield, season, &details)
}

impl FarmPlan {
    fn cost_str(&self, min: u64, max: u64) -> String {
        if self.details.seed_price.min == self.details.seed_price.max {
            format!("{}g", min)
        } else {
            format!("{}g - {}g", min, max)
        }
    }

    /// Markdown explanation of the plan.
    pub fn render(&self) -> String {
        let mut out = format!(
            "## Farming Plan for {} {} in {} ##\n\n",
            self.target_yield,
            self.crop,
            capitalize(&self.season)
        );
        out.push_str(&format!(
            "- **Target Yield**: {} {}\n",
            self.target_yield, self.crop
        ));
        out.push_str(&format!(
            "- **Estimated Plants Needed**: Approximately {} plants to achieve your target yield (assuming average yield).\n",
            self.plants
        ));
        out.push_str(&format!(
            "- **Land Size**: You'll need at least {} individual tiles for planting.\n",
            self.tiles
        ));
        let seeds = self.cost_str(self.seed_cost_min, self.seed_cost_max);
        out.push_str(&format!("- **Seeds Cost**: Approximately {}.\n", seeds));
        out.push_str(&format!(
            "- **Estimated Startup Funds**: Approximately {}.\n",
            seeds
        ));
        out.push_str("- **Growth Information**:\n");
        out.push_str(&format!(
            "  - Initial Growth Time: {} days\n",
            self.details.growth.initial_days
        ));
        match self.details.growth.regrowth_days {
            Some(regrowth) => {
                out.push_str(&format!("  - Regrowth Time: {} days\n", regrowth));
                out.push_str(&format!(
                    "  - Estimated Harvests per Season: {} harvests (due to regrowth).\n",
                    self.harvests_per_season
                ));
            }
            None => out.push_str(&format!(
                "  - Total Growth Time: {} days (single harvest).\n",
                self.details.growth.initial_days
            )),
        }
        out.push_str(
            "\n**Note**: This plan assumes average yields. Fertilizer is not included as it is optional.",
        );
        out
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, SourceType};
    use std::collections::BTreeMap;

    fn hit(title: &str, content: &str, infobox: &[(&str, &str)]) -> SearchHit {
        SearchHit {
            id: title.to_string(),
            content: content.to_string(),
            metadata: ChunkMetadata {
                url: format!("https://stardewvalleywiki.com/{}", title),
                title: title.to_string(),
                source_type: SourceType::Text,
                image_url: None,
                chunk_index: 0,
                table: None,
                infobox: infobox
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            },
            distance: 0.1,
        }
    }

    fn wheat() -> CropDetails {
        CropDetails {
            yield_per_harvest: Range::exact(1),
            growth: GrowthTime {
                initial_days: 4,
                regrowth_days: None,
            },
            seed_price: Range::exact(10),
            seasons: vec!["summer".into(), "fall".into()],
        }
    }

    #[test]
    fn test_wheat_scenario() {
        let plan = compute_plan("Wheat", 100, "summer", &wheat()).unwrap();
        assert_eq!(plan.plants, 100);
        assert_eq!(plan.tiles, 100);
        assert_eq!(plan.seed_cost_min, 1000);
        assert_eq!(plan.seed_cost_max, 1000);
        assert_eq!(plan.harvests_per_season, 1);
        let text = plan.render();
        assert!(text.contains("Approximately 1000g."));
        assert!(text.contains("Fertilizer is not included"));
    }

    #[test]
    fn test_season_mismatch_message() {
        let err = compute_plan("Wheat", 100, "Winter", &wheat()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Wheat does not grow in Winter. It grows in: summer, fall."
        );
    }

    #[test]
    fn test_season_mismatch_without_seasons() {
        let mut details = wheat();
        details.seasons.clear();
        let err = compute_plan("Wheat", 10, "spring", &details).unwrap_err();
        assert!(err.to_string().ends_with("It grows in: N/A."));
    }

    #[test]
    fn test_forty_day_crop_not_viable() {
        let mut details = wheat();
        details.growth.initial_days = 40;
        let err = compute_plan("Wheat", 100, "summer", &details).unwrap_err();
        assert!(matches!(err, PlanError::NotViable { initial_days: 40, .. }));
    }

    #[test]
    fn test_zero_growth_not_viable() {
        let mut details = wheat();
        details.growth.initial_days = 0;
        assert!(matches!(
            compute_plan("Wheat", 1, "summer", &details),
            Err(PlanError::NotViable { .. })
        ));
    }

    #[test]
    fn test_regrowth_harvests() {
        let mut details = wheat();
        details.growth = GrowthTime {
            initial_days: 10,
            regrowth_days: Some(3),
        };
        details.yield_per_harvest = Range::new(1, 2);
        let plan = compute_plan("Wheat", 50, "summer", &details).unwrap();
        assert_eq!(plan.harvests_per_season, 7);
        // avg yield floor((1 + 2) / 2) = 1, so 7 per plant.
        assert_eq!(plan.yield_per_plant, 7);
        assert_eq!(plan.plants, 8);
        assert!(plan.render().contains("7 harvests (due to regrowth)"));
    }

    #[test]
    fn test_zero_yield() {
        let mut details = wheat();
        details.yield_per_harvest = Range::exact(0);
        assert_eq!(
            compute_plan("Wheat", 5, "summer", &details),
            Err(PlanError::ZeroYield {
                crop: "Wheat".into()
            })
        );
    }

    #[test]
    fn test_zero_target_rejected() {
        assert_eq!(
            compute_plan("Wheat", 0, "summer", &wheat()),
            Err(PlanError::InvalidTarget)
        );
    }

    #[test]
    fn test_seed_cost_range_rendered() {
        let mut details = wheat();
        details.seed_price = Range::new(50, 100);
        let plan = compute_plan("Wheat", 10, "summer", &details).unwrap();
        assert_eq!((plan.seed_cost_min, plan.seed_cost_max), (500, 1000));
        assert!(plan.render().contains("500g - 1000g"));
    }

    #[test]
    fn test_resolve_from_infobox_and_text() {
        let hits = vec![hit(
            "Wheat",
            "Wheat yields 1 per harvest and is used to make Beer.",
            &[
                ("Growth", "4 days"),
                ("Season", "Summer, Fall"),
                ("Seed Price", "10g"),
            ],
        )];
        let details = resolve_details("wheat", &hits).unwrap();
        assert_eq!(details, wheat());
    }

    #[test]
    fn test_resolve_fallback_price_key() {
        let hits = vec![hit(
            "Corn",
            "Corn keeps producing after that every 4 days.",
            &[
                ("Growth", "14 days, then 4 days regrowth"),
                ("Seasons", "Summer, Fall"),
                ("General Store Price", "150g"),
            ],
        )];
        let details = resolve_details("Corn", &hits).unwrap();
        assert_eq!(details.seed_price, Range::exact(150));
        assert_eq!(details.yield_per_harvest, Range::exact(1));
        assert_eq!(details.growth.regrowth_days, Some(4));
    }

    #[test]
    fn test_resolve_text_only() {
        let content = "Growth time: 13 days\nRegrowth: 4 days\nSeasons: Summer\nSeeds cost 80g at Pierre's.";
        let hits = vec![hit("Tomato", content, &[])];
        let details = resolve_details("tomato", &hits).unwrap();
        assert_eq!(details.growth.initial_days, 13);
        assert_eq!(details.growth.regrowth_days, Some(4));
        assert_eq!(details.seed_price, Range::exact(80));
        assert_eq!(details.seasons, vec!["summer"]);
        // "regrowth" in the text defaults yield to one per harvest.
        assert_eq!(details.yield_per_harvest, Range::exact(1));
    }

    #[test]
    fn test_resolve_store_sort_value_pattern() {
        let content = r#"Pierre's General Store: data-sort-value="60">60g. Produces 2 per harvest. Growth time: 6 days"#;
        let details = resolve_details("Potato", &[hit("Potato", content, &[])]).unwrap();
        assert_eq!(details.seed_price, Range::exact(60));
        assert_eq!(details.yield_per_harvest, Range::exact(2));
    }

    #[test]
    fn test_resolve_ignores_other_titles() {
        let hits = vec![hit(
            "Blueberry",
            "Growth time: 13 days. Yields 3. Seeds cost 80g",
            &[],
        )];
        assert_eq!(
            resolve_details("Wheat", &hits),
            Err(PlanError::MissingData {
                crop: "Wheat".into()
            })
        );
    }

    #[test]
    fn test_resolve_merges_across_hits() {
        let hits = vec![
            hit("Melon", "Melon yields 1. Growth time: 12 days", &[]),
            hit("Melon Seeds", "Seeds cost 80g. Season: Summer", &[]),
        ];
        let details = resolve_details("melon", &hits).unwrap();
        assert_eq!(details.growth.initial_days, 12);
        assert_eq!(details.seed_price, Range::exact(80));
        assert_eq!(details.seasons, vec!["summer"]);
    }

    #[test]
    fn test_plan_from_hits_season_mismatch_is_a_value() {
        let hits = vec![hit(
            "Wheat",
            "Yields 1.",
            &[
                ("Growth", "4 days"),
                ("Seasons", "Summer, Fall"),
                ("Seed Price", "10g"),
            ],
        )];
        let result = plan_from_hits("Wheat", 100, "spring", &hits);
        assert!(matches!(result, Err(PlanError::SeasonMismatch { .. })));
    }

    #[test]
    fn test_planning_query() {
        assert_eq!(
            planning_query("Wheat"),
            "Wheat Stardew Valley crop growth yield seed price season"
        );
    }
}
