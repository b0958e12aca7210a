use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// The closed set of entity kinds the dump engine knows about.
///
/// Every kind-dependent decision (type folder, descent behavior, content
/// strategy) is an exhaustive match on this enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A leaf process: owns a repository, has input/output links, no callees.
    Calculation,
    /// A composite process: calls calculations and other workflows.
    Workflow,
    /// A plain data node: owns a repository, no process semantics.
    Data,
}

impl EntityKind {
    /// The per-kind folder name used inside a dump content root.
    pub fn type_folder(&self) -> &'static str {
        match self {
            EntityKind::Calculation => "calculations",
            EntityKind::Workflow => "workflows",
            EntityKind::Data => "data",
        }
    }

    /// All kinds, in registry order.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Calculation,
        EntityKind::Workflow,
        EntityKind::Data,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Calculation => "calculation",
            EntityKind::Workflow => "workflow",
            EntityKind::Data => "data",
        };
        write!(f, "{name}")
    }
}

impl FromStr for EntityKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculation" => Ok(EntityKind::Calculation),
            "workflow" => Ok(EntityKind::Workflow),
            "data" => Ok(EntityKind::Data),
            other => Err(TypeError::UnknownKind(other.to_string())),
        }
    }
}

/// Handle for one entity as yielded by the query layer.
///
/// `repository_metadata` carries the entity's last-serialized repository
/// tree (`Null` when the entity has no file content). The dump engine
/// reconstructs a read-only repository from it; it never writes the field
/// back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub uuid: Uuid,
    pub pk: i64,
    pub kind: EntityKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub process_label: Option<String>,
    #[serde(default)]
    pub process_type: Option<String>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub is_stored: bool,
    /// Back-reference to the workflow that called this entity, if any.
    #[serde(default)]
    pub caller: Option<Uuid>,
    #[serde(default)]
    pub repository_metadata: serde_json::Value,
}

impl EntityInfo {
    /// The deterministic directory name for this entity.
    ///
    /// The most specific available name wins: `label`, then
    /// `process_label`, then the last segment of `process_type`. The pk is
    /// always appended, which keeps names unique across entities sharing a
    /// label.
    pub fn directory_name(&self) -> String {
        let base = self
            .label
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.process_label.as_deref().filter(|s| !s.is_empty()))
            .or_else(|| {
                self.process_type
                    .as_deref()
                    .and_then(|t| t.rsplit('.').next())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or("node");
        format!("{}-{}", sanitize_segment(base), self.pk)
    }
}

/// Handle for one group as yielded by the query layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub uuid: Uuid,
    pub pk: i64,
    pub label: String,
    pub mtime: DateTime<Utc>,
}

impl GroupInfo {
    /// The deterministic directory name for this group.
    ///
    /// The pk is always appended; distinct labels can sanitize to the
    /// same segment, and two groups must never share a directory.
    pub fn directory_name(&self) -> String {
        format!("{}-{}", sanitize_segment(&self.label), self.pk)
    }
}

/// Replace characters that are unsafe or ambiguous in a single path
/// segment. Group labels may contain `/` to express nesting upstream; on
/// disk each segment must stand alone.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_entity(kind: EntityKind) -> EntityInfo {
        EntityInfo {
            uuid: Uuid::new_v4(),
            pk: 42,
            kind,
            label: None,
            process_label: None,
            process_type: None,
            ctime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            mtime: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            is_stored: true,
            caller: None,
            repository_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn kind_type_folders() {
        assert_eq!(EntityKind::Calculation.type_folder(), "calculations");
        assert_eq!(EntityKind::Workflow.type_folder(), "workflows");
        assert_eq!(EntityKind::Data.type_folder(), "data");
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in EntityKind::ALL {
            let parsed: EntityKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn kind_parse_rejects_unknown() {
        assert!("process".parse::<EntityKind>().is_err());
    }

    #[test]
    fn kind_serde_is_lowercase() {
        let json = serde_json::to_string(&EntityKind::Workflow).unwrap();
        assert_eq!(json, "\"workflow\"");
    }

    #[test]
    fn directory_name_prefers_label() {
        let mut entity = make_entity(EntityKind::Calculation);
        entity.label = Some("relax".to_string());
        entity.process_label = Some("PwCalculation".to_string());
        assert_eq!(entity.directory_name(), "relax-42");
    }

    #[test]
    fn directory_name_falls_back_to_process_label() {
        let mut entity = make_entity(EntityKind::Calculation);
        entity.process_label = Some("PwCalculation".to_string());
        assert_eq!(entity.directory_name(), "PwCalculation-42");
    }

    #[test]
    fn directory_name_uses_last_process_type_segment() {
        let mut entity = make_entity(EntityKind::Workflow);
        entity.process_type = Some("core.arithmetic.add_multiply".to_string());
        assert_eq!(entity.directory_name(), "add_multiply-42");
    }

    #[test]
    fn directory_name_default_when_nothing_set() {
        let entity = make_entity(EntityKind::Data);
        assert_eq!(entity.directory_name(), "node-42");
    }

    #[test]
    fn directory_name_sanitizes_separators() {
        let mut entity = make_entity(EntityKind::Calculation);
        entity.label = Some("scf step/one two".to_string());
        assert_eq!(entity.directory_name(), "scf-step-one-two-42");
    }

    #[test]
    fn group_directory_name_sanitizes() {
        let group = GroupInfo {
            uuid: Uuid::new_v4(),
            pk: 7,
            label: "project/phase one".to_string(),
            mtime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(group.directory_name(), "project-phase-one-7");
    }

    #[test]
    fn group_directory_names_stay_distinct_when_labels_collide() {
        let make = |pk: i64, label: &str| GroupInfo {
            uuid: Uuid::new_v4(),
            pk,
            label: label.to_string(),
            mtime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        // Both labels sanitize to the same segment.
        let slashed = make(1, "a/b");
        let dashed = make(2, "a-b");
        assert_ne!(slashed.directory_name(), dashed.directory_name());
        assert_eq!(slashed.directory_name(), "a-b-1");
        assert_eq!(dashed.directory_name(), "a-b-2");
    }

    #[test]
    fn sanitize_never_yields_empty() {
        assert_eq!(sanitize_segment("///"), "unnamed");
    }

    #[test]
    fn entity_serde_roundtrip() {
        let mut entity = make_entity(EntityKind::Calculation);
        entity.label = Some("x".to_string());
        let json = serde_json::to_string(&entity).unwrap();
        let parsed: EntityInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entity);
    }
}
