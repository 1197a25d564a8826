//! 리스크 레지스트리.
//!
//! 포지션 상관관계 ID를 현재 익절/손절 레벨과 트레일링/재진입 메타데이터에
//! 매핑합니다. 재진입으로 생긴 레코드는 계보 루트에 연결되며, 독립 손절 모드가
//! 아니면 조회 시 한 번의 간접 참조로 루트 레코드를 돌려줍니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trader_core::{PositionId, Price};

/// 레코드의 계보상 위치.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordLink {
    /// 계보 루트 (레벨과 재진입 예산의 소유자)
    Primary,
    /// 재진입으로 생긴 레코드, 루트 ID를 가리킴
    LinkedTo(PositionId),
}

/// 포지션 하나의 리스크 레코드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    /// 익절 가격 (`None`이면 도달 불가능)
    pub take_price: Option<Price>,
    /// 손절 가격
    pub stop_price: Price,
    /// 트레일링 델타 계산 기준 가격
    pub anchor_price: Price,
    /// 남은 재진입 횟수 (루트 레코드에서만 의미 있음)
    pub retries_left: u32,
    /// 재진입 델타 계산 기준 가격
    pub retry_anchor_price: Price,
    /// 계보상 위치
    pub link: RecordLink,
    /// 트레일링 활성화 여부
    pub trailing_armed: bool,
}

impl RiskRecord {
    /// 새 루트 레코드를 생성합니다. 두 기준 가격은 `anchor`로 시작합니다.
    pub fn new(take_price: Option<Price>, stop_price: Price, anchor: Price) -> Self {
        Self {
            take_price,
            stop_price,
            anchor_price: anchor,
            retries_left: 0,
            retry_anchor_price: anchor,
            link: RecordLink::Primary,
            trailing_armed: false,
        }
    }

    /// 재진입 예산을 설정합니다.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_left = retries;
        self
    }

    /// 트레일링을 활성화된 상태로 시작합니다.
    pub fn armed(mut self) -> Self {
        self.trailing_armed = true;
        self
    }

    /// 연결된 루트 ID (루트면 `None`).
    pub fn parent(&self) -> Option<PositionId> {
        match self.link {
            RecordLink::Primary => None,
            RecordLink::LinkedTo(parent) => Some(parent),
        }
    }

    /// 익절/손절과 두 기준 가격을 `delta`만큼 이동합니다.
    pub fn shift(&mut self, delta: Decimal) {
        self.take_price = self.take_price.map(|take| take + delta);
        self.stop_price += delta;
        self.anchor_price += delta;
    }
}

/// 포지션 ID → 리스크 레코드 저장소.
///
/// 엔진이 단독으로 소유하며, 컨트롤러들에는 참조로 전달됩니다.
#[derive(Debug, Default)]
pub struct RiskRegistry {
    records: HashMap<PositionId, RiskRecord>,
    /// 루트 ID → 생성 순서대로의 자식 ID
    children: HashMap<PositionId, Vec<PositionId>>,
    /// 재진입 레코드가 자신의 레벨을 갖는지 여부
    separate_stops: bool,
}

impl RiskRegistry {
    /// 새 레지스트리를 생성합니다.
    pub fn new(separate_stops: bool) -> Self {
        Self {
            records: HashMap::new(),
            children: HashMap::new(),
            separate_stops,
        }
    }

    /// 독립 손절 모드인지 확인합니다.
    pub fn separate_stops(&self) -> bool {
        self.separate_stops
    }

    /// 레코드를 저장합니다.
    ///
    /// 연결 레코드의 부모가 다른 레코드에 연결돼 있으면 루트로 평탄화합니다.
    pub fn set(&mut self, id: PositionId, mut record: RiskRecord) {
        if let RecordLink::LinkedTo(parent) = record.link {
            let root = self.root_of(parent).unwrap_or(parent);
            record.link = RecordLink::LinkedTo(root);
            let siblings = self.children.entry(root).or_default();
            if !siblings.contains(&id) {
                siblings.push(id);
            }
        }
        self.records.insert(id, record);
    }

    /// 레벨 조회에 사용할 레코드 ID를 반환합니다.
    pub fn resolved_id(&self, id: PositionId) -> Option<PositionId> {
        let record = self.records.get(&id)?;
        match record.link {
            RecordLink::LinkedTo(parent)
                if !self.separate_stops && self.records.contains_key(&parent) =>
            {
                Some(parent)
            }
            _ => Some(id),
        }
    }

    /// 레코드를 조회합니다 (연결 레코드는 루트를 통해 해석).
    pub fn get(&self, id: PositionId) -> Option<&RiskRecord> {
        let target = self.resolved_id(id)?;
        self.records.get(&target)
    }

    /// 수정 가능한 레코드를 조회합니다 (`get`과 같은 해석 규칙).
    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut RiskRecord> {
        let target = self.resolved_id(id)?;
        self.records.get_mut(&target)
    }

    /// 해석 없이 포지션 자신의 레코드를 조회합니다.
    pub fn own(&self, id: PositionId) -> Option<&RiskRecord> {
        self.records.get(&id)
    }

    /// 해석 없이 포지션 자신의 레코드를 수정 가능하게 조회합니다.
    pub fn own_mut(&mut self, id: PositionId) -> Option<&mut RiskRecord> {
        self.records.get_mut(&id)
    }

    /// 레코드 존재 여부.
    pub fn contains(&self, id: PositionId) -> bool {
        self.records.contains_key(&id)
    }

    /// 계보 루트 ID.
    pub fn root_of(&self, id: PositionId) -> Option<PositionId> {
        let record = self.records.get(&id)?;
        Some(record.parent().unwrap_or(id))
    }

    /// 계보 구성원 ID (루트 먼저, 이후 생성 순서).
    pub fn lineage(&self, id: PositionId) -> Vec<PositionId> {
        let Some(root) = self.root_of(id) else {
            return Vec::new();
        };

        let mut members = vec![root];
        if let Some(children) = self.children.get(&root) {
            members.extend(children.iter().copied());
        }
        members
    }

    /// 레코드를 삭제합니다.
    ///
    /// 살아 있는 자식이 있는 루트를 삭제하면 가장 오래된 자식이 루트로 승격되고
    /// 레벨(연결 모드)과 재진입 예산을 넘겨받습니다.
    pub fn delete(&mut self, id: PositionId) -> Option<RiskRecord> {
        let removed = self.records.remove(&id)?;

        match removed.link {
            RecordLink::LinkedTo(root) => {
                if let Some(siblings) = self.children.get_mut(&root) {
                    siblings.retain(|child| *child != id);
                    if siblings.is_empty() {
                        self.children.remove(&root);
                    }
                }
            }
            RecordLink::Primary => {
                if let Some(mut children) = self.children.remove(&id) {
                    if !children.is_empty() {
                        let heir = children.remove(0);
                        self.promote(heir, &removed, children);
                    }
                }
            }
        }

        Some(removed)
    }

    fn promote(&mut self, heir: PositionId, old_root: &RiskRecord, rest: Vec<PositionId>) {
        let separate = self.separate_stops;
        if let Some(record) = self.records.get_mut(&heir) {
            if !separate {
                record.take_price = old_root.take_price;
                record.stop_price = old_root.stop_price;
                record.anchor_price = old_root.anchor_price;
                record.trailing_armed = old_root.trailing_armed;
            }
            record.retries_left = old_root.retries_left;
            record.retry_anchor_price = old_root.retry_anchor_price;
            record.link = RecordLink::Primary;
        }

        for child in &rest {
            if let Some(record) = self.records.get_mut(child) {
                record.link = RecordLink::LinkedTo(heir);
            }
        }
        if !rest.is_empty() {
            self.children.insert(heir, rest);
        }
    }

    /// 저장된 레코드 수.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 저장된 모든 포지션 ID.
    pub fn ids(&self) -> impl Iterator<Item = &PositionId> {
        self.records.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn linked(parent: PositionId, take: Price, stop: Price) -> RiskRecord {
        RiskRecord {
            link: RecordLink::LinkedTo(parent),
            ..RiskRecord::new(Some(take), stop, dec!(100))
        }
    }

    #[test]
    fn test_unknown_id_is_absent() {
        let registry = RiskRegistry::new(false);
        assert!(registry.get(Uuid::new_v4()).is_none());
        assert!(registry.lineage(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_set_get_delete() {
        let mut registry = RiskRegistry::new(false);
        let id = Uuid::new_v4();

        registry.set(id, RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)));
        assert_eq!(registry.get(id).unwrap().take_price, Some(dec!(105)));

        let removed = registry.delete(id).unwrap();
        assert_eq!(removed.stop_price, dec!(97));
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_linked_record_reads_through_parent() {
        let mut registry = RiskRegistry::new(false);
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();

        registry.set(root, RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)));
        registry.set(child, linked(root, dec!(200), dec!(1)));

        // 자식 자신의 레벨은 무시되고 루트가 반환됨
        assert_eq!(registry.get(child).unwrap().stop_price, dec!(97));
        assert_eq!(registry.own(child).unwrap().stop_price, dec!(1));

        // 자식을 통한 수정은 루트를 수정
        registry.get_mut(child).unwrap().stop_price = dec!(98);
        assert_eq!(registry.get(root).unwrap().stop_price, dec!(98));
    }

    #[test]
    fn test_separate_stops_do_not_resolve() {
        let mut registry = RiskRegistry::new(true);
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();

        registry.set(root, RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)));
        registry.set(child, linked(root, dec!(102), dec!(94)));

        assert_eq!(registry.get(child).unwrap().stop_price, dec!(94));
        assert_eq!(registry.root_of(child), Some(root));
    }

    #[test]
    fn test_links_flatten_to_root() {
        let mut registry = RiskRegistry::new(false);
        let root = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        registry.set(root, RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)));
        registry.set(first, linked(root, dec!(105), dec!(97)));
        // 자식에 연결해도 루트로 평탄화
        registry.set(second, linked(first, dec!(105), dec!(97)));

        assert_eq!(registry.own(second).unwrap().parent(), Some(root));
        assert_eq!(registry.lineage(second), vec![root, first, second]);
    }

    #[test]
    fn test_root_deletion_promotes_oldest_child() {
        let mut registry = RiskRegistry::new(false);
        let root = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        registry.set(
            root,
            RiskRecord::new(Some(dec!(102)), dec!(94), dec!(97)).with_retries(1),
        );
        registry.set(first, linked(root, dec!(0), dec!(0)));
        registry.set(second, linked(root, dec!(0), dec!(0)));

        registry.delete(root);

        let promoted = registry.own(first).unwrap();
        assert_eq!(promoted.link, RecordLink::Primary);
        assert_eq!(promoted.stop_price, dec!(94));
        assert_eq!(promoted.retries_left, 1);

        assert_eq!(registry.root_of(second), Some(first));
        assert_eq!(registry.get(second).unwrap().take_price, Some(dec!(102)));
        assert_eq!(registry.lineage(second), vec![first, second]);
    }

    #[test]
    fn test_child_deletion_leaves_root() {
        let mut registry = RiskRegistry::new(false);
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();

        registry.set(root, RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)));
        registry.set(child, linked(root, dec!(105), dec!(97)));
        registry.delete(child);

        assert_eq!(registry.lineage(root), vec![root]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shift_moves_levels_and_anchor() {
        let mut record = RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100));
        record.shift(dec!(-3));

        assert_eq!(record.take_price, Some(dec!(102)));
        assert_eq!(record.stop_price, dec!(94));
        assert_eq!(record.anchor_price, dec!(97));
        // 재진입 기준가는 별도로 관리
        assert_eq!(record.retry_anchor_price, dec!(100));
    }
}
