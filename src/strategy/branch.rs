//! 分支适配子模型：进阶（Progression）/ 跳过（Advancement）/ 补救（Remediation）
//!
//! 这些结构随后会被课程内容选择逻辑检索与匹配，因此：
//! - 补救映射按概念名大小写不敏感，且键和优先级列表都不能为空；
//! - 元数据属性按优先级排序，但身份只由属性值 + 标签决定。

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::StrategyError;

/// 元数据属性的默认优先级
pub const DEFAULT_ATTRIBUTE_PRIORITY: u32 = 1;

/// Merrill 教学象限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerrillQuadrant {
    Rule,
    Example,
    Recall,
    Practice,
    RemediationAfterRecall,
    RemediationAfterPractice,
}

/// 分支适配的具体类型（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchAdaptation {
    Progression(ProgressionInfo),
    Advancement(AdvancementInfo),
    Remediation(RemediationInfo),
}

impl BranchAdaptation {
    pub fn label(&self) -> &'static str {
        match self {
            BranchAdaptation::Progression(_) => "progression",
            BranchAdaptation::Advancement(_) => "advancement",
            BranchAdaptation::Remediation(_) => "remediation",
        }
    }
}

// ---------------------------------------------------------------------------
// MetadataAttributeItem
// ---------------------------------------------------------------------------

/// 内容选择用的元数据属性：优先级可变，身份 = 属性值 + 标签
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MetadataAttributeRepr")]
pub struct MetadataAttributeItem {
    attribute: String,
    priority: u32,
    label: Option<String>,
}

#[derive(Deserialize)]
struct MetadataAttributeRepr {
    attribute: String,
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default)]
    label: Option<String>,
}

fn default_priority() -> u32 {
    DEFAULT_ATTRIBUTE_PRIORITY
}

impl TryFrom<MetadataAttributeRepr> for MetadataAttributeItem {
    type Error = StrategyError;

    fn try_from(repr: MetadataAttributeRepr) -> Result<Self, Self::Error> {
        let mut item = MetadataAttributeItem::new(repr.attribute)?.with_priority(repr.priority);
        item.label = repr.label;
        Ok(item)
    }
}

impl MetadataAttributeItem {
    /// 属性值不能为空
    pub fn new(attribute: impl Into<String>) -> Result<Self, StrategyError> {
        let attribute = attribute.into();
        if attribute.trim().is_empty() {
            return Err(StrategyError::invalid("The attribute's value can't be empty."));
        }
        Ok(Self {
            attribute,
            priority: DEFAULT_ATTRIBUTE_PRIORITY,
            label: None,
        })
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// 用于区分同一学习者状态属性在不同概念下派生出的多组属性（如 "map reading"）
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn increase_priority(&mut self) {
        self.priority = self.priority.saturating_add(1);
    }

    /// 不会低于 0
    pub fn decrease_priority(&mut self) {
        self.priority = self.priority.saturating_sub(1);
    }

    /// 按优先级升序比较（与 Eq 无关，仅用于排序）
    pub fn priority_order(a: &Self, b: &Self) -> Ordering {
        a.priority.cmp(&b.priority)
    }

    pub fn sort_by_priority(items: &mut [Self]) {
        items.sort_by(Self::priority_order);
    }
}

impl PartialEq for MetadataAttributeItem {
    fn eq(&self, other: &Self) -> bool {
        self.attribute == other.attribute && self.label == other.label
    }
}

impl Eq for MetadataAttributeItem {}

impl Hash for MetadataAttributeItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.attribute.hash(state);
        self.label.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

/// 进入下一个象限；quadrant 为 None 表示退出分支点
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressionInfo {
    pub quadrant: Option<MerrillQuadrant>,
    #[serde(default)]
    pub attributes: Vec<MetadataAttributeItem>,
}

impl ProgressionInfo {
    pub fn exit() -> Self {
        Self::default()
    }

    pub fn to(quadrant: MerrillQuadrant, attributes: Vec<MetadataAttributeItem>) -> Self {
        Self {
            quadrant: Some(quadrant),
            attributes,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.quadrant.is_none()
    }
}

// ---------------------------------------------------------------------------
// Advancement
// ---------------------------------------------------------------------------

/// 可跳过的概念（学习者已是专家）；相等性按概念名大小写不敏感
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AdvancementConceptRepr")]
pub struct AdvancementConcept {
    concept: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct AdvancementConceptRepr {
    concept: String,
    #[serde(default)]
    reason: Option<String>,
}

impl TryFrom<AdvancementConceptRepr> for AdvancementConcept {
    type Error = StrategyError;

    fn try_from(repr: AdvancementConceptRepr) -> Result<Self, Self::Error> {
        let concept = AdvancementConcept::new(repr.concept)?;
        Ok(match repr.reason {
            Some(reason) => concept.with_reason(reason),
            None => concept,
        })
    }
}

impl AdvancementConcept {
    pub fn new(concept: impl Into<String>) -> Result<Self, StrategyError> {
        let concept = concept.into();
        if concept.trim().is_empty() {
            return Err(StrategyError::invalid("The advancement concept can't be empty."));
        }
        Ok(Self { concept, reason: None })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn key(&self) -> String {
        self.concept.to_lowercase()
    }
}

impl PartialEq for AdvancementConcept {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AdvancementConcept {}

impl Hash for AdvancementConcept {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// 一个或多个可跳过的概念；相等 / 哈希基于概念集合 + 技能标记，与顺序无关
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AdvancementRepr")]
pub struct AdvancementInfo {
    concepts: Vec<AdvancementConcept>,
    is_skill: bool,
}

#[derive(Deserialize)]
struct AdvancementRepr {
    concepts: Vec<AdvancementConcept>,
    #[serde(default)]
    is_skill: bool,
}

impl TryFrom<AdvancementRepr> for AdvancementInfo {
    type Error = StrategyError;

    fn try_from(repr: AdvancementRepr) -> Result<Self, Self::Error> {
        AdvancementInfo::new(repr.concepts, repr.is_skill)
    }
}

impl AdvancementInfo {
    /// 概念列表不能为空；重复概念（大小写不敏感）只保留第一个
    pub fn new(concepts: Vec<AdvancementConcept>, is_skill: bool) -> Result<Self, StrategyError> {
        if concepts.is_empty() {
            return Err(StrategyError::invalid(
                "The advancement concept list must contain at least one entry.",
            ));
        }
        let mut deduped: Vec<AdvancementConcept> = Vec::with_capacity(concepts.len());
        for concept in concepts {
            if !deduped.contains(&concept) {
                deduped.push(concept);
            }
        }
        Ok(Self {
            concepts: deduped,
            is_skill,
        })
    }

    pub fn knowledge(concepts: Vec<AdvancementConcept>) -> Result<Self, StrategyError> {
        Self::new(concepts, false)
    }

    pub fn concepts(&self) -> &[AdvancementConcept] {
        &self.concepts
    }

    pub fn is_skill(&self) -> bool {
        self.is_skill
    }

    fn concept_keys(&self) -> BTreeSet<String> {
        self.concepts.iter().map(AdvancementConcept::key).collect()
    }
}

impl PartialEq for AdvancementInfo {
    fn eq(&self, other: &Self) -> bool {
        self.is_skill == other.is_skill && self.concept_keys() == other.concept_keys()
    }
}

impl Eq for AdvancementInfo {}

impl Hash for AdvancementInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for key in self.concept_keys() {
            key.hash(state);
        }
        self.is_skill.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

/// 单个概念的补救方式（ICAP：主动 / 互动 / 建构 / 被动）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemediationConcept {
    Active {
        concept: String,
    },
    Interactive {
        concept: String,
    },
    Constructive {
        concept: String,
    },
    Passive {
        concept: String,
        quadrant: MerrillQuadrant,
        #[serde(default)]
        attributes: Vec<MetadataAttributeItem>,
    },
}

impl RemediationConcept {
    pub fn active(concept: impl Into<String>) -> Result<Self, StrategyError> {
        Ok(Self::Active {
            concept: checked_concept(concept.into())?,
        })
    }

    pub fn interactive(concept: impl Into<String>) -> Result<Self, StrategyError> {
        Ok(Self::Interactive {
            concept: checked_concept(concept.into())?,
        })
    }

    pub fn constructive(concept: impl Into<String>) -> Result<Self, StrategyError> {
        Ok(Self::Constructive {
            concept: checked_concept(concept.into())?,
        })
    }

    pub fn passive(
        concept: impl Into<String>,
        quadrant: MerrillQuadrant,
        attributes: Vec<MetadataAttributeItem>,
    ) -> Result<Self, StrategyError> {
        Ok(Self::Passive {
            concept: checked_concept(concept.into())?,
            quadrant,
            attributes,
        })
    }

    pub fn concept(&self) -> &str {
        match self {
            Self::Active { concept }
            | Self::Interactive { concept }
            | Self::Constructive { concept }
            | Self::Passive { concept, .. } => concept,
        }
    }
}

fn checked_concept(concept: String) -> Result<String, StrategyError> {
    if concept.trim().is_empty() {
        return Err(StrategyError::invalid("The concept name can't be empty."));
    }
    Ok(concept)
}

/// 概念名（大小写不敏感）→ 降序优先级的补救列表；afterPractice 区分练习后 / 回忆后补救
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RemediationRepr")]
pub struct RemediationInfo {
    remediation_map: HashMap<String, Vec<RemediationConcept>>,
    after_practice: bool,
}

#[derive(Deserialize)]
struct RemediationRepr {
    #[serde(default)]
    remediation_map: HashMap<String, Vec<RemediationConcept>>,
    #[serde(default)]
    after_practice: bool,
}

impl TryFrom<RemediationRepr> for RemediationInfo {
    type Error = StrategyError;

    fn try_from(repr: RemediationRepr) -> Result<Self, Self::Error> {
        for list in repr.remediation_map.values() {
            for item in list {
                checked_concept(item.concept().to_string())?;
            }
        }
        let mut info = RemediationInfo::new(repr.after_practice);
        info.set_remediation_map(repr.remediation_map)?;
        Ok(info)
    }
}

impl RemediationInfo {
    pub fn new(after_practice: bool) -> Self {
        Self {
            remediation_map: HashMap::new(),
            after_practice,
        }
    }

    /// 设置单个概念的补救列表；键为空或列表为空立即失败
    pub fn set_concept_remediation(
        &mut self,
        concept: &str,
        prioritized: Vec<RemediationConcept>,
    ) -> Result<(), StrategyError> {
        validate_entry(concept, &prioritized)?;
        self.remediation_map.insert(concept.to_lowercase(), prioritized);
        Ok(())
    }

    /// 整体替换；先校验全部条目，任一非法则原映射不变
    pub fn set_remediation_map(
        &mut self,
        map: HashMap<String, Vec<RemediationConcept>>,
    ) -> Result<(), StrategyError> {
        let mut normalized = HashMap::with_capacity(map.len());
        for (concept, prioritized) in map {
            validate_entry(&concept, &prioritized)?;
            let key = concept.to_lowercase();
            if normalized.contains_key(&key) {
                return Err(StrategyError::invalid(format!(
                    "The remediation map has more than one entry for concept '{concept}' (names are case-insensitive)."
                )));
            }
            normalized.insert(key, prioritized);
        }
        self.remediation_map = normalized;
        Ok(())
    }

    pub fn get(&self, concept: &str) -> Option<&[RemediationConcept]> {
        self.remediation_map
            .get(&concept.to_lowercase())
            .map(Vec::as_slice)
    }

    pub fn remediation_map(&self) -> &HashMap<String, Vec<RemediationConcept>> {
        &self.remediation_map
    }

    pub fn is_after_practice(&self) -> bool {
        self.after_practice
    }

    pub fn set_after_practice(&mut self, after_practice: bool) {
        self.after_practice = after_practice;
    }
}

fn validate_entry(concept: &str, prioritized: &[RemediationConcept]) -> Result<(), StrategyError> {
    if concept.trim().is_empty() {
        return Err(StrategyError::invalid(
            "Found a null or empty concept in the remediation map.",
        ));
    }
    if prioritized.is_empty() {
        return Err(StrategyError::invalid(format!(
            "The prioritized list for concept '{concept}' can't be empty."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn concept(name: &str) -> AdvancementConcept {
        AdvancementConcept::new(name).unwrap()
    }

    #[test]
    fn test_advancement_equality_is_order_independent() {
        let a = AdvancementInfo::new(vec![concept("Map Reading"), concept("Compass")], true).unwrap();
        let b = AdvancementInfo::new(vec![concept("compass"), concept("map reading")], true).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let knowledge = AdvancementInfo::knowledge(vec![concept("Compass"), concept("Map Reading")]).unwrap();
        assert_ne!(a, knowledge);
    }

    #[test]
    fn test_advancement_requires_concepts() {
        assert!(matches!(
            AdvancementInfo::new(vec![], false),
            Err(StrategyError::InvalidArgument(_))
        ));
        assert!(AdvancementConcept::new("  ").is_err());
    }

    #[test]
    fn test_advancement_dedupes_concepts() {
        let info = AdvancementInfo::knowledge(vec![
            concept("Tank").with_reason("tested out"),
            concept("tank"),
        ])
        .unwrap();
        assert_eq!(info.concepts().len(), 1);
        assert_eq!(info.concepts()[0].reason(), Some("tested out"));
    }

    #[test]
    fn test_remediation_lookup_is_case_insensitive() {
        let mut info = RemediationInfo::new(false);
        info.set_concept_remediation("Tank", vec![RemediationConcept::active("Tank").unwrap()])
            .unwrap();
        let found = info.get("tank").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].concept(), "Tank");
        assert!(info.get("TANK").is_some());
    }

    #[test]
    fn test_remediation_rejects_empty_list_and_blank_key() {
        let mut info = RemediationInfo::new(true);
        assert!(info.set_concept_remediation("Tank", vec![]).is_err());
        assert!(info
            .set_concept_remediation(" ", vec![RemediationConcept::constructive("x").unwrap()])
            .is_err());
        assert!(info.remediation_map().is_empty());
    }

    #[test]
    fn test_remediation_map_replacement_is_all_or_nothing() {
        let mut info = RemediationInfo::new(false);
        info.set_concept_remediation("keep", vec![RemediationConcept::interactive("keep").unwrap()])
            .unwrap();

        let mut bad = HashMap::new();
        bad.insert("Fine".to_string(), vec![RemediationConcept::active("Fine").unwrap()]);
        bad.insert("Broken".to_string(), vec![]);
        assert!(info.set_remediation_map(bad).is_err());
        assert!(info.get("keep").is_some());

        let mut good = HashMap::new();
        good.insert(
            "Bearing".to_string(),
            vec![RemediationConcept::passive("Bearing", MerrillQuadrant::Example, vec![]).unwrap()],
        );
        info.set_remediation_map(good).unwrap();
        assert!(info.get("keep").is_none());
        assert!(info.get("bearing").is_some());
    }

    #[test]
    fn test_remediation_map_rejects_case_colliding_keys() {
        let mut info = RemediationInfo::new(false);
        info.set_concept_remediation("keep", vec![RemediationConcept::interactive("keep").unwrap()])
            .unwrap();

        let mut colliding = HashMap::new();
        colliding.insert("Tank".to_string(), vec![RemediationConcept::active("Tank").unwrap()]);
        colliding.insert("tank".to_string(), vec![RemediationConcept::constructive("tank").unwrap()]);
        assert!(matches!(
            info.set_remediation_map(colliding),
            Err(StrategyError::InvalidArgument(_))
        ));
        assert!(info.get("keep").is_some());
        assert!(info.get("tank").is_none());

        let json = r#"{"remediation_map": {
            "Tank": [{"type": "active", "concept": "Tank"}],
            "TANK": [{"type": "active", "concept": "Tank"}]
        }}"#;
        assert!(serde_json::from_str::<RemediationInfo>(json).is_err());
    }

    #[test]
    fn test_advancement_concept_deserialize_validates() {
        assert!(serde_json::from_str::<AdvancementConcept>(r#"{"concept": "  "}"#).is_err());
        let parsed: AdvancementConcept =
            serde_json::from_str(r#"{"concept": "Compass", "reason": "pretest"}"#).unwrap();
        assert_eq!(parsed.concept(), "Compass");
        assert_eq!(parsed.reason(), Some("pretest"));

        let json = r#"{"concepts": [{"concept": ""}], "is_skill": false}"#;
        assert!(serde_json::from_str::<AdvancementInfo>(json).is_err());
    }

    #[test]
    fn test_remediation_deserialize_validates() {
        let json = r#"{"remediation_map": {"Tank": []}, "after_practice": true}"#;
        assert!(serde_json::from_str::<RemediationInfo>(json).is_err());

        let json = r#"{"remediation_map": {"Tank": [{"type": "active", "concept": "Tank"}]}}"#;
        let info: RemediationInfo = serde_json::from_str(json).unwrap();
        assert!(info.get("tank").is_some());
        assert!(!info.is_after_practice());
    }

    #[test]
    fn test_metadata_attribute_identity_ignores_priority() {
        let a = MetadataAttributeItem::new("Example").unwrap().with_priority(5);
        let b = MetadataAttributeItem::new("Example").unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let labelled = MetadataAttributeItem::new("Example").unwrap().with_label("compass");
        assert_ne!(a, labelled);
    }

    #[test]
    fn test_metadata_attribute_priority_ordering() {
        let mut items = vec![
            MetadataAttributeItem::new("c").unwrap().with_priority(3),
            MetadataAttributeItem::new("a").unwrap().with_priority(0),
            MetadataAttributeItem::new("b").unwrap(),
        ];
        MetadataAttributeItem::sort_by_priority(&mut items);
        let order: Vec<_> = items.iter().map(|i| i.attribute()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let mut low = MetadataAttributeItem::new("x").unwrap().with_priority(0);
        low.decrease_priority();
        assert_eq!(low.priority(), 0);
        low.increase_priority();
        assert_eq!(low.priority(), 1);
        assert!(MetadataAttributeItem::new("").is_err());
    }

    #[test]
    fn test_progression_exit() {
        assert!(ProgressionInfo::exit().is_exit());
        assert!(!ProgressionInfo::to(MerrillQuadrant::Practice, vec![]).is_exit());
    }
}
