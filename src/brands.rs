//! Cinema brand and alias tables
//!
//! Static, read-only after first use. Table order is significant: the first
//! brand whose keyword occurs in a name wins, so brands whose keywords contain
//! another brand's keyword (`中影星美` contains `星美`) are listed first.

use ahash::AHashSet;
use once_cell::sync::Lazy;

/// One canonical cinema name together with its informal variants.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub standard_name: &'static str,
    pub aliases: &'static [&'static str],
    pub brand_tag: &'static str,
    pub brand_keywords: &'static [&'static str],
}

/// A brand tag and the keywords that identify it, case-insensitive.
#[derive(Debug, Clone, Copy)]
pub struct BrandKeywords {
    pub brand: &'static str,
    pub keywords: &'static [&'static str],
}

pub const BRAND_TABLE: &[BrandKeywords] = &[
    BrandKeywords { brand: "中影星美", keywords: &["中影星美"] },
    BrandKeywords { brand: "万达", keywords: &["万达", "wanda"] },
    BrandKeywords { brand: "CGV", keywords: &["cgv", "希杰"] },
    BrandKeywords { brand: "大地", keywords: &["大地影院", "大地数字", "dadi"] },
    BrandKeywords { brand: "金逸", keywords: &["金逸", "jinyi"] },
    BrandKeywords { brand: "横店", keywords: &["横店"] },
    BrandKeywords { brand: "博纳", keywords: &["博纳", "bona"] },
    BrandKeywords { brand: "耀莱", keywords: &["耀莱", "成龙"] },
    BrandKeywords { brand: "星美", keywords: &["星美"] },
    BrandKeywords { brand: "中影", keywords: &["中影", "cfc"] },
    BrandKeywords { brand: "上影", keywords: &["上影", "sfc"] },
    BrandKeywords { brand: "UME", keywords: &["ume"] },
    BrandKeywords { brand: "百老汇", keywords: &["百老汇", "broadway"] },
    BrandKeywords { brand: "卢米埃", keywords: &["卢米埃", "lumiere"] },
    BrandKeywords { brand: "橙天嘉禾", keywords: &["嘉禾", "橙天"] },
    BrandKeywords { brand: "保利", keywords: &["保利", "poly"] },
    BrandKeywords { brand: "华夏", keywords: &["华夏"] },
    BrandKeywords { brand: "幸福蓝海", keywords: &["幸福蓝海"] },
    BrandKeywords { brand: "太平洋", keywords: &["太平洋影城", "太平洋电影"] },
];

pub const ALIAS_TABLE: &[AliasEntry] = &[
    AliasEntry {
        standard_name: "万达影城",
        aliases: &["万达电影", "万达国际影城", "万达电影城", "wanda cinemas"],
        brand_tag: "万达",
        brand_keywords: &["万达", "wanda"],
    },
    AliasEntry {
        standard_name: "CGV影城",
        aliases: &["cgv", "cgv星聚汇影城", "希杰cgv", "cgv影院"],
        brand_tag: "CGV",
        brand_keywords: &["cgv", "希杰"],
    },
    AliasEntry {
        standard_name: "大地影院",
        aliases: &["大地数字影院", "大地电影院", "dadi cinema"],
        brand_tag: "大地",
        brand_keywords: &["大地影院", "大地数字", "dadi"],
    },
    AliasEntry {
        standard_name: "金逸影城",
        aliases: &["金逸国际影城", "金逸电影城", "金逸影院"],
        brand_tag: "金逸",
        brand_keywords: &["金逸", "jinyi"],
    },
    AliasEntry {
        standard_name: "横店电影城",
        aliases: &["横店影城", "横店影视城", "横店影院"],
        brand_tag: "横店",
        brand_keywords: &["横店"],
    },
    AliasEntry {
        standard_name: "博纳国际影城",
        aliases: &["博纳影城", "博纳影院", "bona cinema"],
        brand_tag: "博纳",
        brand_keywords: &["博纳", "bona"],
    },
    AliasEntry {
        standard_name: "耀莱成龙影城",
        aliases: &["耀莱影城", "成龙影城", "耀莱成龙国际影城"],
        brand_tag: "耀莱",
        brand_keywords: &["耀莱", "成龙"],
    },
    AliasEntry {
        standard_name: "中影国际影城",
        aliases: &["中影影城", "中影电影城", "cfc中影"],
        brand_tag: "中影",
        brand_keywords: &["中影", "cfc"],
    },
    AliasEntry {
        standard_name: "百老汇影城",
        aliases: &["百老汇电影中心", "broadway cinemas"],
        brand_tag: "百老汇",
        brand_keywords: &["百老汇", "broadway"],
    },
    AliasEntry {
        standard_name: "华夏影城",
        aliases: &["华夏电影院", "华夏国际影城"],
        brand_tag: "华夏",
        brand_keywords: &["华夏"],
    },
];

/// Screen/format tags that distinguish two branches of one brand.
pub const FEATURE_TAGS: &[&str] = &["IMAX", "4DX", "VIP", "CINITY", "DOLBY", "杜比", "巨幕", "激光"];

const LOCATION_SUFFIXES: &[&str] = &["广场", "中心", "店", "路", "号", "街", "区"];

/// Lowercased alias/standard name -> index into [`ALIAS_TABLE`].
static ALIAS_INDEX: Lazy<ahash::AHashMap<String, usize>> = Lazy::new(|| {
    let mut index = ahash::AHashMap::new();
    for (i, entry) in ALIAS_TABLE.iter().enumerate() {
        index.insert(entry.standard_name.to_lowercase(), i);
        for alias in entry.aliases {
            index.insert(alias.to_lowercase(), i);
        }
    }
    index
});

fn alias_entry_of(name: &str) -> Option<usize> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    ALIAS_INDEX.get(&key).copied()
}

/// Look up the full alias entry a name belongs to.
pub fn resolve_alias(name: &str) -> Option<&'static AliasEntry> {
    alias_entry_of(name).map(|i| &ALIAS_TABLE[i])
}

/// First brand in table order whose keyword occurs in `name`.
pub fn extract_brand(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    BRAND_TABLE
        .iter()
        .find(|b| b.keywords.iter().any(|k| lower.contains(k)))
        .map(|b| b.brand)
}

/// True if both names resolve to the same alias entry.
pub fn alias_match(name_a: &str, name_b: &str) -> bool {
    match (alias_entry_of(name_a), alias_entry_of(name_b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// True if any keyword of `brand` occurs in `name`, case-insensitive.
pub fn brand_match(brand: &str, name: &str) -> bool {
    let lower = name.to_lowercase();
    BRAND_TABLE
        .iter()
        .filter(|b| b.brand.eq_ignore_ascii_case(brand))
        .any(|b| b.keywords.iter().any(|k| lower.contains(k)))
}

/// Score two same-brand names: 0.8 base, up to 0.1 for a shared location,
/// 0.05 per shared feature tag. Capped at 1.0.
pub fn brand_score(target_name: &str, candidate_name: &str, brand: &str) -> f64 {
    brand_score_detail(target_name, candidate_name, brand).0
}

/// [`brand_score`] together with human-readable supporting reasons.
pub fn brand_score_detail(target_name: &str, candidate_name: &str, brand: &str) -> (f64, Vec<String>) {
    let mut score = 0.8;
    let mut reasons = vec![format!("品牌匹配: {brand}")];

    let target_locations = location_fragments(target_name);
    let candidate_locations = location_fragments(candidate_name);
    if let Some(shared) = target_locations
        .iter()
        .find(|loc| candidate_locations.contains(*loc))
    {
        score += 0.1;
        reasons.push(format!("位置匹配: {shared}"));
    } else if let Some(partial) = target_locations
        .iter()
        .map(|loc| strip_location_suffix(loc))
        .find(|stem| stem.chars().count() >= 2 && candidate_name.contains(stem))
    {
        score += 0.05;
        reasons.push(format!("位置相近: {partial}"));
    }

    let target_features = feature_tags(target_name);
    let candidate_features = feature_tags(candidate_name);
    let shared_features: Vec<&str> = target_features
        .intersection(&candidate_features)
        .copied()
        .collect();
    if !shared_features.is_empty() {
        score += 0.05 * shared_features.len() as f64;
        let mut sorted = shared_features;
        sorted.sort_unstable();
        reasons.push(format!("特色匹配: {}", sorted.join("/")));
    }

    (score.min(1.0), reasons)
}

/// Fragments such as `CBD店` or `人民广场`: two to four word characters
/// immediately before a location suffix, plus the suffix. Every length in
/// that range is kept so `城CBD店` and `(CBD店)` still share `CBD店`.
fn location_fragments(name: &str) -> AHashSet<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut fragments = AHashSet::new();

    for suffix in LOCATION_SUFFIXES {
        let suffix_chars: Vec<char> = suffix.chars().collect();
        let n = suffix_chars.len();
        if chars.len() <= n {
            continue;
        }
        for end in n..=chars.len() {
            let suffix_start = end - n;
            if chars[suffix_start..end] != suffix_chars[..] {
                continue;
            }
            let mut start = suffix_start;
            while start > 0 && suffix_start - start < 4 && chars[start - 1].is_alphanumeric() {
                start -= 1;
                if suffix_start - start >= 2 {
                    fragments.insert(chars[start..end].iter().collect());
                }
            }
        }
    }
    fragments
}

fn strip_location_suffix(fragment: &str) -> &str {
    LOCATION_SUFFIXES
        .iter()
        .find_map(|suffix| fragment.strip_suffix(suffix))
        .unwrap_or(fragment)
}

fn feature_tags(name: &str) -> AHashSet<&'static str> {
    let upper = name.to_uppercase();
    FEATURE_TAGS
        .iter()
        .filter(|tag| upper.contains(*tag))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_brand_respects_table_order() {
        assert_eq!(extract_brand("中影星美国际影城"), Some("中影星美"));
        assert_eq!(extract_brand("星美影城(望京店)"), Some("星美"));
        assert_eq!(extract_brand("Wanda IMAX"), Some("万达"));
        assert_eq!(extract_brand("某某影院"), None);
    }

    #[test]
    fn test_alias_match() {
        assert!(alias_match("万达电影", "万达影城"));
        assert!(alias_match("万达国际影城", "Wanda Cinemas"));
        assert!(alias_match("CGV", "CGV影城"));
        assert!(!alias_match("万达电影", "CGV影城"));
        assert!(!alias_match("某某影院", "某某影院"));
    }

    #[test]
    fn test_brand_match_is_case_insensitive() {
        assert!(brand_match("CGV", "cgv星聚汇影城(颐堤港店)"));
        assert!(brand_match("cgv", "CGV影城"));
        assert!(!brand_match("万达", "CGV影城"));
    }

    #[test]
    fn test_brand_score_location_bonus() {
        let same = brand_score("万达影城(CBD店)", "万达影城CBD店", "万达");
        let other = brand_score("万达影城(CBD店)", "万达影城(通州店)", "万达");
        assert!((same - 0.9).abs() < 1e-9);
        assert!((other - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_brand_score_feature_bonus_and_cap() {
        let score = brand_score("万达影城(CBD店)IMAX", "万达影城CBD店 IMAX", "万达");
        assert!((score - 0.95).abs() < 1e-9);

        let capped = brand_score(
            "万达影城(CBD店)IMAX 4DX VIP 杜比",
            "万达影城CBD店 IMAX 4DX VIP 杜比",
            "万达",
        );
        assert!((capped - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alias_sets_are_disjoint() {
        let mut seen = AHashSet::new();
        for entry in ALIAS_TABLE {
            assert!(seen.insert(entry.standard_name.to_lowercase()));
            for alias in entry.aliases {
                assert!(seen.insert(alias.to_lowercase()), "duplicate alias {alias}");
            }
        }
    }
}
