//! Structured field extraction
//!
//! Mines recognized packaging text for the medicine name, ingredient list
//! and quantity using per-language keyword and pattern tables, and scores
//! the result deterministically by which fields were found.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use crate::lang::LanguageTag;

/// Structured information mined from packaging text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineInfo {
    /// Product or drug name
    pub name: Option<String>,
    /// De-duplicated ingredient lines, in first-seen order
    pub ingredients: Vec<String>,
    /// Package quantity (e.g. "20錠", "10 tablets")
    pub quantity: Option<String>,
    /// Deterministic extraction confidence in [0, 1]
    pub confidence: f32,
}

impl MedicineInfo {
    fn empty() -> Self {
        Self {
            name: None,
            ingredients: Vec::new(),
            quantity: None,
            confidence: 0.0,
        }
    }
}

/// Keyword lists and patterns for one language.
struct FieldTables {
    name_keywords: &'static [&'static str],
    ingredient_keywords: &'static [&'static str],
    quantity_keywords: &'static [&'static str],
    /// Numeric dose: digits followed by a mass/volume unit
    dose: Regex,
    /// Package count: digits followed by a tablet/bottle-style unit
    unit_count: Regex,
}

impl FieldTables {
    fn new(
        name_keywords: &'static [&'static str],
        ingredient_keywords: &'static [&'static str],
        quantity_keywords: &'static [&'static str],
        dose_units: &str,
        count_units: &str,
    ) -> Self {
        Self {
            name_keywords,
            ingredient_keywords,
            quantity_keywords,
            dose: Regex::new(&format!(r"\d+(?:\.\d+)?\s*(?:{dose_units})")).unwrap(),
            unit_count: Regex::new(&format!(r"\d+(?:\.\d+)?\s*(?:{count_units})")).unwrap(),
        }
    }
}

static ZH_TW: LazyLock<FieldTables> = LazyLock::new(|| {
    FieldTables::new(
        &["藥品", "藥名", "品名", "商品名", "學名", "成藥", "醫藥", "膠囊", "錠", "藥片", "藥水", "注射液"],
        &["成分", "主成分", "活性成分", "配方", "含有", "含量", "組成", "組份", "賦形劑"],
        &["數量", "含量", "劑量", "每日劑量", "每日用量", "用量", "毫克", "微克", "公克", "公斤", "毫升", "克", "mg", "mcg", "g", "ml"],
        "毫克|微克|公克|公斤|毫升|克|mg|mcg|g|ml|mL",
        "錠|膠囊|粒|包|瓶|支|片|劑",
    )
});

static ZH_CN: LazyLock<FieldTables> = LazyLock::new(|| {
    FieldTables::new(
        &["药品", "药名", "品名", "商品名", "学名", "成药", "医药", "胶囊", "锭", "药片", "药水", "注射液"],
        &["成分", "主成分", "活性成分", "配方", "含有", "含量", "组成", "组份", "赋形剂"],
        &["数量", "含量", "剂量", "每日剂量", "每日用量", "用量", "毫克", "微克", "公克", "公斤", "毫升", "克", "mg", "mcg", "g", "ml"],
        "毫克|微克|公克|公斤|毫升|克|mg|mcg|g|ml|mL",
        "锭|胶囊|粒|包|瓶|支|片|剂",
    )
});

static EN: LazyLock<FieldTables> = LazyLock::new(|| {
    FieldTables::new(
        &["medicine", "drug", "name", "brand", "capsule", "tablet", "pill", "syrup", "injection", "product"],
        &["ingredient", "active", "composition", "contains", "content", "component", "excipient", "formulation"],
        &["quantity", "amount", "dosage", "daily dose", "dose", "milligram", "microgram", "gram", "kilogram", "milliliter", "mg", "mcg", "g", "ml"],
        "(?:milligram|microgram|gram|kilogram|milliliter)s?|mg|mcg|g|ml|mL",
        "(?:tablet|capsule|pill|pack|bottle|piece|dose)s?",
    )
});

static JA: LazyLock<FieldTables> = LazyLock::new(|| {
    FieldTables::new(
        &["薬", "薬品", "薬名", "商品名", "カプセル", "錠", "丸", "注射液"],
        &["成分", "主成分", "組成", "含有", "含量", "配合", "賦形剤"],
        &["数量", "含量", "用量", "1日量", "投与量", "ミリグラム", "マイクログラム", "グラム", "キログラム", "ミリリットル", "mg", "mcg", "g", "ml"],
        "ミリグラム|マイクログラム|グラム|キログラム|ミリリットル|mg|mcg|g|ml|mL",
        "錠|カプセル|粒|包|瓶|本|枚|剤",
    )
});

static KO: LazyLock<FieldTables> = LazyLock::new(|| {
    FieldTables::new(
        &["약", "약품", "약명", "상품명", "캡슐", "정", "주사액"],
        &["성분", "주성분", "조성", "함유", "함량", "배합"],
        &["수량", "함량", "용량", "일일 용량", "투여량", "밀리그램", "마이크로그램", "그램", "킬로그램", "밀리리터", "mg", "mcg", "g", "ml"],
        "밀리그램|마이크로그램|그램|킬로그램|밀리리터|mg|mcg|g|ml|mL",
        "정|캡슐|알|팩|병|개|조각|제",
    )
});

/// Tables for a tag; `Auto` and anything else falls back to English.
fn tables_for(tag: LanguageTag) -> &'static FieldTables {
    match tag {
        LanguageTag::TraditionalChinese => &ZH_TW,
        LanguageTag::SimplifiedChinese => &ZH_CN,
        LanguageTag::English => &EN,
        LanguageTag::Japanese => &JA,
        LanguageTag::Korean => &KO,
        LanguageTag::Auto => &EN,
    }
}

/// Extract structured medicine information from recognized text.
///
/// Empty or whitespace-only text short-circuits to an all-absent result with
/// confidence 0.0.
pub fn extract(text: &str, tag: LanguageTag) -> MedicineInfo {
    if text.trim().is_empty() {
        debug!("empty recognition output, nothing to extract");
        return MedicineInfo::empty();
    }

    let tables = tables_for(tag);
    let lines: Vec<&str> = text.lines().collect();

    let name = extract_name(&lines, tables);
    let ingredients = extract_ingredients(&lines, tables);
    let quantity = extract_quantity(&lines, tables);
    let confidence = score_confidence(name.is_some(), ingredients.len(), quantity.is_some());

    debug!(
        "extraction: name={:?} ingredients={} quantity={:?} confidence={:.2}",
        name,
        ingredients.len(),
        quantity,
        confidence
    );

    MedicineInfo {
        name,
        ingredients,
        quantity,
        confidence,
    }
}

/// Additive confidence: 0.4 for a name, 0.1 per ingredient capped at 0.4,
/// 0.2 for a quantity. Maximum 1.0.
fn score_confidence(has_name: bool, ingredient_count: usize, has_quantity: bool) -> f32 {
    let mut confidence = 0.0;
    if has_name {
        confidence += 0.4;
    }
    if ingredient_count > 0 {
        confidence += (0.1 * ingredient_count as f32).min(0.4);
    }
    if has_quantity {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

/// Collapse whitespace runs to single spaces and trim the ends.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text after the first ASCII or full-width colon, if non-empty.
fn colon_remainder(line: &str) -> Option<&str> {
    let idx = line.find([':', '：'])?;
    let sep_len = line[idx..].chars().next().map(char::len_utf8)?;
    let rest = line[idx + sep_len..].trim();
    (!rest.is_empty()).then_some(rest)
}

fn extract_name(lines: &[&str], tables: &FieldTables) -> Option<String> {
    // Keyword-bearing line wins.
    if let Some((line, keyword)) = lines.iter().find_map(|line| {
        tables
            .name_keywords
            .iter()
            .find(|kw| line.contains(*kw))
            .map(|kw| (*line, *kw))
    }) {
        if let Some(rest) = colon_remainder(line) {
            return Some(clean_text(rest));
        }
        // Keyword embedded with trailing content ("品名舒緩膠囊").
        if let Some(pos) = line.find(keyword) {
            let trailing = line[pos + keyword.len()..].trim();
            if !trailing.is_empty() {
                return Some(clean_text(trailing));
            }
        }
        return Some(clean_text(line));
    }

    // Packaging titles cluster near the top: take the first real line of the
    // first five that is not just keywords.
    lines
        .iter()
        .take(5)
        .find(|line| !line.trim().is_empty() && !is_only_keywords(line, tables))
        .map(|line| clean_text(line))
}

/// Whether a line consists solely of known keywords and punctuation.
fn is_only_keywords(line: &str, tables: &FieldTables) -> bool {
    let mut remainder = line.to_lowercase();
    for keyword in tables
        .name_keywords
        .iter()
        .chain(tables.ingredient_keywords)
        .chain(tables.quantity_keywords)
    {
        remainder = remainder.replace(&keyword.to_lowercase(), "");
    }
    !remainder.chars().any(char::is_alphanumeric)
}

/// Whether a line mentions a non-ingredient section (name or quantity
/// keywords that are not also ingredient keywords). Used to close an open
/// ingredient section.
fn starts_other_section(line: &str, tables: &FieldTables) -> bool {
    tables
        .name_keywords
        .iter()
        .chain(tables.quantity_keywords)
        .filter(|kw| !tables.ingredient_keywords.contains(*kw))
        .any(|kw| line.contains(kw))
}

fn extract_ingredients(lines: &[&str], tables: &FieldTables) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut section_seen = false;
    let mut in_section = false;

    for line in lines {
        if tables.ingredient_keywords.iter().any(|kw| line.contains(kw)) {
            section_seen = true;
            in_section = true;
            // Prefer the explicit "成分: ..." form, else a dose-bearing line.
            if let Some(rest) = colon_remainder(line) {
                found.push(clean_text(rest));
            } else if tables.dose.is_match(line) {
                found.push(clean_text(line));
            }
            continue;
        }

        if in_section {
            if line.trim().is_empty() {
                in_section = false;
            } else if tables.dose.is_match(line) {
                // Dose-bearing lines continue the section even when they
                // carry a bare unit token that doubles as a quantity keyword.
                found.push(clean_text(line));
            } else if starts_other_section(line, tables) {
                in_section = false;
            }
        }
    }

    // No section anywhere: sweep the whole text for dose-bearing lines.
    if !section_seen {
        for line in lines {
            if tables.dose.is_match(line) {
                found.push(clean_text(line));
            }
        }
    }

    dedup_preserving_order(found)
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn extract_quantity(lines: &[&str], tables: &FieldTables) -> Option<String> {
    let keyword_lines: Vec<&str> = lines
        .iter()
        .filter(|line| tables.quantity_keywords.iter().any(|kw| line.contains(kw)))
        .copied()
        .collect();

    // Package counts ("20錠") beat raw doses ("500mg") across all keyword
    // lines, so a dose on an earlier ingredient line does not shadow the
    // actual quantity line.
    for line in &keyword_lines {
        if let Some(m) = tables.unit_count.find(line) {
            return Some(clean_text(m.as_str()));
        }
    }
    for line in &keyword_lines {
        if let Some(m) = tables.dose.find(line) {
            return Some(clean_text(m.as_str()));
        }
    }

    // No keyword line produced anything: first package count anywhere.
    lines
        .iter()
        .find_map(|line| tables.unit_count.find(line))
        .map(|m| clean_text(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_empty_result() {
        for text in ["", "   ", "\n\n  \n"] {
            let info = extract(text, LanguageTag::TraditionalChinese);
            assert_eq!(info.name, None);
            assert!(info.ingredients.is_empty());
            assert_eq!(info.quantity, None);
            assert_eq!(info.confidence, 0.0);
        }
    }

    #[test]
    fn test_traditional_chinese_packaging() {
        let text = "品名：舒緩膠囊\n成分：Acetaminophen 500mg\n數量：20錠";
        let info = extract(text, LanguageTag::TraditionalChinese);

        assert_eq!(info.name.as_deref(), Some("舒緩膠囊"));
        assert_eq!(info.ingredients, vec!["Acetaminophen 500mg"]);
        assert_eq!(info.quantity.as_deref(), Some("20錠"));
        assert!((info.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_name_from_embedded_keyword() {
        let text = "品名舒緩膠囊\n其他說明";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.name.as_deref(), Some("舒緩膠囊"));
    }

    #[test]
    fn test_name_fallback_to_leading_line() {
        let text = "SOOTHE-RELIEF FORTE\nsome marketing copy\ningredients: caffeine 30mg";
        let info = extract(text, LanguageTag::English);
        assert_eq!(info.name.as_deref(), Some("SOOTHE-RELIEF FORTE"));
    }

    #[test]
    fn test_name_fallback_skips_keyword_only_lines() {
        let text = "Tablet\nAspirin Extra";
        let info = extract(text, LanguageTag::English);
        assert_eq!(info.name.as_deref(), Some("Aspirin Extra"));
    }

    #[test]
    fn test_ingredient_section_continuation() {
        let text = "成分：\nAcetaminophen 500mg\nCaffeine 30mg\n\n用法用量：每日三次";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(
            info.ingredients,
            vec!["Acetaminophen 500mg", "Caffeine 30mg"]
        );
    }

    #[test]
    fn test_ingredient_section_closed_by_other_keyword() {
        // The 數量 line both closes the section and must not be recorded as
        // an ingredient.
        let text = "成分\nAcetaminophen 500mg\n數量 20錠\nCaffeine 30mg";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.ingredients, vec!["Acetaminophen 500mg"]);
    }

    #[test]
    fn test_ingredient_sweep_without_section() {
        let text = "Pain relief\nAcetaminophen 500mg per tablet\nCaffeine 30mg per tablet";
        let info = extract(text, LanguageTag::English);
        assert_eq!(
            info.ingredients,
            vec![
                "Acetaminophen 500mg per tablet",
                "Caffeine 30mg per tablet"
            ]
        );
    }

    #[test]
    fn test_ingredients_deduplicated() {
        let text = "成分：Vitamin C 100mg\n組成：Vitamin C 100mg";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.ingredients, vec!["Vitamin C 100mg"]);
    }

    #[test]
    fn test_quantity_prefers_unit_count_over_dose() {
        let text = "含量 Acetaminophen 500mg\n數量：20錠";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.quantity.as_deref(), Some("20錠"));
    }

    #[test]
    fn test_quantity_dose_fallback() {
        let text = "每日劑量 500mg";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.quantity.as_deref(), Some("500mg"));
    }

    #[test]
    fn test_quantity_global_unit_scan() {
        let text = "舒緩配方精選\n每盒 30粒";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.quantity.as_deref(), Some("30粒"));
    }

    #[test]
    fn test_cleaned_ingredient_still_matches_dose_pattern() {
        let text = "ingredients:   Acetaminophen   500 mg  ";
        let info = extract(text, LanguageTag::English);
        let tables = tables_for(LanguageTag::English);
        for ingredient in &info.ingredients {
            assert!(
                tables.dose.is_match(ingredient),
                "cleaning stripped the dose from {ingredient:?}"
            );
        }
        assert!(!info.ingredients.is_empty());
    }

    #[test]
    fn test_unsupported_tag_uses_english_tables() {
        let text = "product: Aspirin\ningredients: aspirin 100mg\nquantity: 10 tablets";
        let info = extract(text, LanguageTag::Auto);
        assert_eq!(info.name.as_deref(), Some("Aspirin"));
        assert_eq!(info.quantity.as_deref(), Some("10 tablets"));
    }

    #[test]
    fn test_confidence_boundaries() {
        assert!((score_confidence(true, 0, false) - 0.4).abs() < 1e-6);
        assert!((score_confidence(true, 4, false) - 0.8).abs() < 1e-6);
        assert!((score_confidence(true, 4, true) - 1.0).abs() < 1e-6);
        assert!((score_confidence(true, 9, true) - 1.0).abs() < 1e-6);
        assert!((score_confidence(false, 2, true) - 0.4).abs() < 1e-6);
        assert_eq!(score_confidence(false, 0, false), 0.0);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text = "品名：舒緩膠囊\n成分：Acetaminophen 500mg\n數量：20錠";
        let first = extract(text, LanguageTag::TraditionalChinese);
        for _ in 0..3 {
            assert_eq!(extract(text, LanguageTag::TraditionalChinese), first);
        }
    }

    #[test]
    fn test_whitespace_normalization() {
        let text = "品名：  舒緩   膠囊  ";
        let info = extract(text, LanguageTag::TraditionalChinese);
        assert_eq!(info.name.as_deref(), Some("舒緩 膠囊"));
    }
}
