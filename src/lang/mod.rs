//! Language identification
//!
//! Classifies OCR sample text into one of the supported packaging languages.
//! Uses the lingua statistical classifier restricted to the four script
//! families we ship keyword tables for, with a character-set heuristic to
//! split generic Chinese into traditional and simplified variants.

use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Supported language tag for recognition and extraction.
///
/// `Auto` is an internal probe mode used for the first recognition pass only;
/// it is never returned by the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageTag {
    #[serde(rename = "zh-tw")]
    TraditionalChinese,
    #[serde(rename = "zh-cn")]
    SimplifiedChinese,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "auto")]
    Auto,
}

impl LanguageTag {
    /// Short code used in config files, CLI output and the database.
    pub fn code(&self) -> &'static str {
        match self {
            LanguageTag::TraditionalChinese => "zh-tw",
            LanguageTag::SimplifiedChinese => "zh-cn",
            LanguageTag::English => "en",
            LanguageTag::Japanese => "ja",
            LanguageTag::Korean => "ko",
            LanguageTag::Auto => "auto",
        }
    }

    /// Parse a short code; unknown codes map to `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "zh-tw" => Some(LanguageTag::TraditionalChinese),
            "zh-cn" => Some(LanguageTag::SimplifiedChinese),
            "en" => Some(LanguageTag::English),
            "ja" => Some(LanguageTag::Japanese),
            "ko" => Some(LanguageTag::Korean),
            "auto" => Some(LanguageTag::Auto),
            _ => None,
        }
    }

    /// Tesseract language string for this tag.
    ///
    /// `Auto` maps to the dual English + traditional-Chinese dictionary used
    /// by the language-probing pass.
    pub fn tesseract_lang(&self) -> &'static str {
        match self {
            LanguageTag::TraditionalChinese => "chi_tra",
            LanguageTag::SimplifiedChinese => "chi_sim",
            LanguageTag::English => "eng",
            LanguageTag::Japanese => "jpn",
            LanguageTag::Korean => "kor",
            LanguageTag::Auto => "eng+chi_tra",
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, LanguageTag::Auto)
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// Characters whose codepoint only occurs in simplified text. Curated pairs:
// each entry here has its traditional form in TRADITIONAL_ONLY, never the
// same codepoint. Shared characters (e.g. 中, 文) are deliberately absent.
const SIMPLIFIED_ONLY: &str = "专东两严为举义乐习乡书买乱亚产亲亿仅从仓价众优会伟传伤伦体余侠侣侦侧俭债倾储儿党兰关兴养兽写军农冯决况冻净凉减凑几凤击刘则刚创删剂剑剧劝办务动励劳势华协单卖卫厂厅历厉压厌县参双发变号叹后吗吨听启吴员响哑唤喷团园围国图圆圣场坏块坚坛垒堕墙壮声壳处备复够头夹夺奋奖妇妈娱婴实宠审宪宽寝对寻导尔尝层属岁岗币师带帮广庆库应庙废开异弃张弯弹强归当录彻径忆怀态总恋恳恶悬惊惩惯愤懒戏战扑执扩扰报担拟拥拦择挂挤挥据掷摇摄摊敌敛数断显晋晓晕暂术朴机杀杂权条来杰极构枣栋栏树样检楼毁气汇汉沟泪泽洁浊测浓涛润涨渐湿溃滚满滥潜灭灯灵灾灿炼烂烦烧爱爷牵牺状独狭狮猎献猪猫玛环现琼疮疯痒监盖盘矫矿砖础硕碍礼祸离种积称窜窝竖竞笔笼筑筹签简紧红约级纪纬纱纲纳纵纷纸纺线练组绍经绑结绕绘给络绝统继绩绪续维绵绸综绿编缚缝缩罚罗罢胆脏脸舰舱艰艺节苍药莲获";

const TRADITIONAL_ONLY: &str = "專東兩嚴為舉義樂習鄉書買亂亞產親億僅從倉價眾優會偉傳傷倫體餘俠侶偵側儉債傾儲兒黨蘭關興養獸寫軍農馮決況凍淨涼減湊幾鳳擊劉則剛創刪劑劍劇勸辦務動勵勞勢華協單賣衛廠廳歷厲壓厭縣參雙發變號嘆後嗎噸聽啟吳員響啞喚噴團園圍國圖圓聖場壞塊堅壇壘墮牆壯聲殼處備複夠頭夾奪奮獎婦媽娛嬰實寵審憲寬寢對尋導爾嘗層屬歲崗幣師帶幫廣慶庫應廟廢開異棄張彎彈強歸當錄徹徑憶懷態總戀懇惡懸驚懲慣憤懶戲戰撲執擴擾報擔擬擁攔擇掛擠揮據擲搖攝攤敵斂數斷顯晉曉暈暫術樸機殺雜權條來傑極構棗棟欄樹樣檢樓毀氣匯漢溝淚澤潔濁測濃濤潤漲漸濕潰滾滿濫潛滅燈靈災燦煉爛煩燒愛爺牽犧狀獨狹獅獵獻豬貓瑪環現瓊瘡瘋癢監蓋盤矯礦磚礎碩礙禮禍離種積稱竄窩豎競筆籠築籌簽簡緊紅約級紀緯紗綱納縱紛紙紡線練組紹經綁結繞繪給絡絕統繼績緒續維綿綢綜綠編縛縫縮罰羅罷膽臟臉艦艙艱藝節蒼藥蓮獲";

/// Statistical language identifier over OCR sample text.
pub struct LanguageIdentifier {
    detector: LanguageDetector,
    default_tag: LanguageTag,
    min_sample_chars: usize,
}

impl LanguageIdentifier {
    /// Build an identifier restricted to the supported script families.
    ///
    /// Lingua's classification is deterministic for a fixed language set, so
    /// identical input text always yields the same tag.
    pub fn new(default_tag: LanguageTag, min_sample_chars: usize) -> Self {
        let detector = LanguageDetectorBuilder::from_languages(&[
            Language::Chinese,
            Language::English,
            Language::Japanese,
            Language::Korean,
        ])
        .build();

        Self {
            detector,
            default_tag,
            min_sample_chars,
        }
    }

    /// Classify `text` into a supported language tag.
    ///
    /// Inputs with fewer than the configured minimum of trimmed characters
    /// carry too little signal and resolve to the default tag. Classifier
    /// failures also resolve to the default rather than propagating.
    pub fn identify(&self, text: &str) -> LanguageTag {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.min_sample_chars {
            warn!(
                "sample too short for reliable identification ({} chars), defaulting to {}",
                trimmed.chars().count(),
                self.default_tag
            );
            return self.default_tag;
        }

        match self.detector.detect_language_of(trimmed) {
            Some(Language::Chinese) => {
                let tag = chinese_variant(trimmed);
                debug!("classified as Chinese, variant resolved to {tag}");
                tag
            }
            Some(Language::English) => LanguageTag::English,
            Some(Language::Japanese) => LanguageTag::Japanese,
            Some(Language::Korean) => LanguageTag::Korean,
            None => {
                warn!("language classification inconclusive, defaulting to {}", self.default_tag);
                self.default_tag
            }
        }
    }
}

/// Map a BCP-47-style locale string reported by the cloud backend to a
/// supported tag. Unknown locales map to `None` so the caller falls back to
/// local identification.
pub fn locale_to_tag(locale: &str) -> Option<LanguageTag> {
    let lower = locale.trim().to_ascii_lowercase();

    if let Some(tag) = LanguageTag::from_code(&lower) {
        return (!tag.is_auto()).then_some(tag);
    }

    match lower.as_str() {
        "zh" | "zh-hant" | "zh-hk" | "zh-mo" => return Some(LanguageTag::TraditionalChinese),
        "zh-hans" | "zh-sg" => return Some(LanguageTag::SimplifiedChinese),
        _ => {}
    }

    if lower.starts_with("en") {
        Some(LanguageTag::English)
    } else if lower.starts_with("ja") {
        Some(LanguageTag::Japanese)
    } else if lower.starts_with("ko") {
        Some(LanguageTag::Korean)
    } else {
        None
    }
}

/// Split generic Chinese into traditional or simplified by counting
/// occurrences of variant-exclusive characters. Ties (including zero hits on
/// both sides) resolve to traditional, matching the pipeline default bias.
pub fn chinese_variant(text: &str) -> LanguageTag {
    let simplified = text.chars().filter(|c| SIMPLIFIED_ONLY.contains(*c)).count();
    let traditional = text.chars().filter(|c| TRADITIONAL_ONLY.contains(*c)).count();

    debug!("variant character counts: simplified={simplified} traditional={traditional}");

    if simplified > traditional {
        LanguageTag::SimplifiedChinese
    } else {
        LanguageTag::TraditionalChinese
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_sets_are_disjoint() {
        for c in SIMPLIFIED_ONLY.chars() {
            assert!(
                !TRADITIONAL_ONLY.contains(c),
                "character {c} appears in both variant sets"
            );
        }
    }

    #[test]
    fn test_short_input_defaults() {
        let id = LanguageIdentifier::new(LanguageTag::TraditionalChinese, 5);
        assert_eq!(id.identify(""), LanguageTag::TraditionalChinese);
        assert_eq!(id.identify("   ab  "), LanguageTag::TraditionalChinese);
        assert_eq!(id.identify("abcd"), LanguageTag::TraditionalChinese);
    }

    #[test]
    fn test_identify_english() {
        let id = LanguageIdentifier::new(LanguageTag::TraditionalChinese, 5);
        assert_eq!(
            id.identify("Take two tablets daily after meals with water"),
            LanguageTag::English
        );
    }

    #[test]
    fn test_identify_korean() {
        let id = LanguageIdentifier::new(LanguageTag::TraditionalChinese, 5);
        assert_eq!(
            id.identify("성분 아세트아미노펜 오백 밀리그램 하루 두 번 복용"),
            LanguageTag::Korean
        );
    }

    #[test]
    fn test_identify_japanese_kana() {
        let id = LanguageIdentifier::new(LanguageTag::TraditionalChinese, 5);
        assert_eq!(
            id.identify("成分はアセトアミノフェンです。一日二回服用してください"),
            LanguageTag::Japanese
        );
    }

    #[test]
    fn test_variant_traditional() {
        assert_eq!(chinese_variant("藥品成分含量說明請參閱包裝"), LanguageTag::TraditionalChinese);
    }

    #[test]
    fn test_variant_simplified() {
        assert_eq!(chinese_variant("药品成分说明请参阅包装"), LanguageTag::SimplifiedChinese);
    }

    #[test]
    fn test_variant_tie_prefers_traditional() {
        // No variant-exclusive characters on either side.
        assert_eq!(chinese_variant("中文"), LanguageTag::TraditionalChinese);
    }

    #[test]
    fn test_identify_is_deterministic() {
        let id = LanguageIdentifier::new(LanguageTag::TraditionalChinese, 5);
        let text = "Paracetamol tablets for oral use only";
        let first = id.identify(text);
        for _ in 0..5 {
            assert_eq!(id.identify(text), first);
        }
    }

    #[test]
    fn test_locale_mapping() {
        assert_eq!(locale_to_tag("zh-TW"), Some(LanguageTag::TraditionalChinese));
        assert_eq!(locale_to_tag("zh-Hant"), Some(LanguageTag::TraditionalChinese));
        assert_eq!(locale_to_tag("zh"), Some(LanguageTag::TraditionalChinese));
        assert_eq!(locale_to_tag("zh-CN"), Some(LanguageTag::SimplifiedChinese));
        assert_eq!(locale_to_tag("en-US"), Some(LanguageTag::English));
        assert_eq!(locale_to_tag("ja-JP"), Some(LanguageTag::Japanese));
        assert_eq!(locale_to_tag("ko"), Some(LanguageTag::Korean));
        assert_eq!(locale_to_tag("fr-FR"), None);
        assert_eq!(locale_to_tag("auto"), None);
    }

    #[test]
    fn test_code_roundtrip() {
        for tag in [
            LanguageTag::TraditionalChinese,
            LanguageTag::SimplifiedChinese,
            LanguageTag::English,
            LanguageTag::Japanese,
            LanguageTag::Korean,
            LanguageTag::Auto,
        ] {
            assert_eq!(LanguageTag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(LanguageTag::from_code("fr"), None);
    }
}
