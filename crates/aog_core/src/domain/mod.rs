use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Deserializer, Serialize};

/// Workflow states of an AOG event, in canonical forward order.
///
/// The transition graph (see `workflow`) is a DAG over these states that
/// terminates at `Closed`; every edge points to a strictly later state in
/// this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AogStatus {
    Reported,
    Troubleshooting,
    IssueIdentified,
    ResolvedNoParts,
    PartRequired,
    ProcurementRequested,
    FinanceApprovalPending,
    OrderPlaced,
    InTransit,
    AtPort,
    CustomsClearance,
    ReceivedInStores,
    PartIssued,
    InstallationInProgress,
    InstallationComplete,
    OpsTest,
    BackInService,
    Closed,
}

impl AogStatus {
    pub const ALL: [AogStatus; 18] = [
        AogStatus::Reported,
        AogStatus::Troubleshooting,
        AogStatus::IssueIdentified,
        AogStatus::ResolvedNoParts,
        AogStatus::PartRequired,
        AogStatus::ProcurementRequested,
        AogStatus::FinanceApprovalPending,
        AogStatus::OrderPlaced,
        AogStatus::InTransit,
        AogStatus::AtPort,
        AogStatus::CustomsClearance,
        AogStatus::ReceivedInStores,
        AogStatus::PartIssued,
        AogStatus::InstallationInProgress,
        AogStatus::InstallationComplete,
        AogStatus::OpsTest,
        AogStatus::BackInService,
        AogStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AogStatus::Reported => "REPORTED",
            AogStatus::Troubleshooting => "TROUBLESHOOTING",
            AogStatus::IssueIdentified => "ISSUE_IDENTIFIED",
            AogStatus::ResolvedNoParts => "RESOLVED_NO_PARTS",
            AogStatus::PartRequired => "PART_REQUIRED",
            AogStatus::ProcurementRequested => "PROCUREMENT_REQUESTED",
            AogStatus::FinanceApprovalPending => "FINANCE_APPROVAL_PENDING",
            AogStatus::OrderPlaced => "ORDER_PLACED",
            AogStatus::InTransit => "IN_TRANSIT",
            AogStatus::AtPort => "AT_PORT",
            AogStatus::CustomsClearance => "CUSTOMS_CLEARANCE",
            AogStatus::ReceivedInStores => "RECEIVED_IN_STORES",
            AogStatus::PartIssued => "PART_ISSUED",
            AogStatus::InstallationInProgress => "INSTALLATION_IN_PROGRESS",
            AogStatus::InstallationComplete => "INSTALLATION_COMPLETE",
            AogStatus::OpsTest => "OPS_TEST",
            AogStatus::BackInService => "BACK_IN_SERVICE",
            AogStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<AogStatus> {
        AogStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Position in the canonical forward ordering.
    pub fn ordinal(&self) -> usize {
        AogStatus::ALL
            .iter()
            .position(|st| st == self)
            .unwrap_or(usize::MAX)
    }
}

/// External dependency holding up progress while in a blocking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockingReason {
    Finance,
    Port,
    Customs,
    Vendor,
    Ops,
    Other,
}

impl BlockingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingReason::Finance => "Finance",
            BlockingReason::Port => "Port",
            BlockingReason::Customs => "Customs",
            BlockingReason::Vendor => "Vendor",
            BlockingReason::Ops => "Ops",
            BlockingReason::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<BlockingReason> {
        [
            BlockingReason::Finance,
            BlockingReason::Port,
            BlockingReason::Customs,
            BlockingReason::Vendor,
            BlockingReason::Ops,
            BlockingReason::Other,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsibleParty {
    Internal,
    #[serde(rename = "OEM")]
    Oem,
    Customs,
    Finance,
    Other,
}

impl ResponsibleParty {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponsibleParty::Internal => "Internal",
            ResponsibleParty::Oem => "OEM",
            ResponsibleParty::Customs => "Customs",
            ResponsibleParty::Finance => "Finance",
            ResponsibleParty::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<ResponsibleParty> {
        [
            ResponsibleParty::Internal,
            ResponsibleParty::Oem,
            ResponsibleParty::Customs,
            ResponsibleParty::Finance,
            ResponsibleParty::Other,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AogCategory {
    Scheduled,
    Unscheduled,
    Aog,
}

impl AogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AogCategory::Scheduled => "scheduled",
            AogCategory::Unscheduled => "unscheduled",
            AogCategory::Aog => "aog",
        }
    }

    pub fn parse(s: &str) -> Option<AogCategory> {
        [
            AogCategory::Scheduled,
            AogCategory::Unscheduled,
            AogCategory::Aog,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
    }
}

/// Lifecycle of a part request owned by an AOG event. Forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartRequestStatus {
    Requested,
    Approved,
    Ordered,
    Shipped,
    Received,
    Issued,
}

impl PartRequestStatus {
    pub const ALL: [PartRequestStatus; 6] = [
        PartRequestStatus::Requested,
        PartRequestStatus::Approved,
        PartRequestStatus::Ordered,
        PartRequestStatus::Shipped,
        PartRequestStatus::Received,
        PartRequestStatus::Issued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartRequestStatus::Requested => "REQUESTED",
            PartRequestStatus::Approved => "APPROVED",
            PartRequestStatus::Ordered => "ORDERED",
            PartRequestStatus::Shipped => "SHIPPED",
            PartRequestStatus::Received => "RECEIVED",
            PartRequestStatus::Issued => "ISSUED",
        }
    }

    pub fn parse(s: &str) -> Option<PartRequestStatus> {
        PartRequestStatus::ALL.into_iter().find(|p| p.as_str() == s)
    }

    pub fn ordinal(&self) -> usize {
        PartRequestStatus::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or(usize::MAX)
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Self::parse(s).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unknown {} value: {s}", stringify!($ty)).into(),
                    )
                })
            }
        }
    };
}

sql_text_enum!(AogStatus);
sql_text_enum!(BlockingReason);
sql_text_enum!(ResponsibleParty);
sql_text_enum!(AogCategory);
sql_text_enum!(PartRequestStatus);

/// The 7 ordered milestone timestamps of an event, as nullable RFC3339 UTC
/// strings. The chronological invariant over the non-null subset is enforced
/// by `timeline::validate_milestone_order`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestones {
    pub reported_at: Option<String>,
    pub procurement_requested_at: Option<String>,
    pub available_at_store_at: Option<String>,
    pub issued_back_at: Option<String>,
    pub installation_complete_at: Option<String>,
    pub test_start_at: Option<String>,
    pub up_and_running_at: Option<String>,
}

impl Milestones {
    /// Field name / value pairs in the fixed chronological order.
    pub fn ordered_pairs(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("reported_at", self.reported_at.as_deref()),
            (
                "procurement_requested_at",
                self.procurement_requested_at.as_deref(),
            ),
            ("available_at_store_at", self.available_at_store_at.as_deref()),
            ("issued_back_at", self.issued_back_at.as_deref()),
            (
                "installation_complete_at",
                self.installation_complete_at.as_deref(),
            ),
            ("test_start_at", self.test_start_at.as_deref()),
            ("up_and_running_at", self.up_and_running_at.as_deref()),
        ]
    }
}

/// One tracked Aircraft-on-Ground incident.
///
/// The four `*_hours` metrics are derived and stored for query performance;
/// they are overwritten as a group on every timestamp change and never
/// hand-edited. `downtime_hours` mirrors `total_downtime_hours` for callers
/// that predate the three-bucket model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AogEvent {
    pub id: i64,
    pub aircraft_id: i64,
    pub category: AogCategory,
    pub reason_code: Option<String>,
    pub responsible_party: Option<ResponsibleParty>,
    pub location: Option<String>,
    pub current_status: AogStatus,
    pub blocking_reason: Option<BlockingReason>,
    pub detected_at: String,
    pub cleared_at: Option<String>,
    #[serde(flatten)]
    pub milestones: Milestones,
    pub technical_time_hours: Option<f64>,
    pub procurement_time_hours: Option<f64>,
    pub ops_time_hours: Option<f64>,
    pub total_downtime_hours: Option<f64>,
    pub downtime_hours: Option<f64>,
    pub labor_cost: Option<f64>,
    pub parts_cost: Option<f64>,
    pub external_cost: Option<f64>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRequest {
    pub id: i64,
    pub event_id: i64,
    pub part_number: String,
    pub description: Option<String>,
    pub status: PartRequestStatus,
    pub vendor: Option<String>,
    pub quantity: i64,
    pub unit_cost: Option<f64>,
    pub currency: Option<String>,
    pub requested_at: Option<String>,
    pub needed_by: Option<String>,
    pub received_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One status transition, as appended by the history recorder. `changed_at`
/// is the wall-clock time of the transition; `metadata_json` carries caller
/// supplied cross-references (part request id, finance/shipping refs) verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub event_id: i64,
    pub from_status: AogStatus,
    pub to_status: AogStatus,
    pub changed_at: String,
    pub actor: String,
    pub actor_role: Option<String>,
    pub notes: Option<String>,
    pub metadata_json: Option<String>,
}

/// One milestone value set or changed. `value_ts` is the milestone's own
/// (possibly backdated) timestamp; `recorded_at`/`recorded_by` capture the
/// recording action itself. The two are distinct on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneHistoryEntry {
    pub id: i64,
    pub event_id: i64,
    pub milestone: String,
    pub value_ts: Option<String>,
    pub recorded_at: String,
    pub recorded_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAuditEntry {
    pub id: i64,
    pub event_id: i64,
    pub field: String,
    pub previous_value: Option<f64>,
    pub new_value: Option<f64>,
    pub changed_at: String,
    pub changed_by: String,
}

/// Tri-state patch field distinguishing "absent from the request" from
/// "explicitly cleared". Deserializes from the conventional JSON shape:
/// a missing key stays `Unchanged` (via `#[serde(default)]`), `null` becomes
/// `Clear`, and a value becomes `Set`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPatch<T> {
    Unchanged,
    Clear,
    Set(T),
}

impl<T> Default for FieldPatch<T> {
    fn default() -> Self {
        FieldPatch::Unchanged
    }
}

impl<T> FieldPatch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FieldPatch::Unchanged)
    }
}

impl<T: Clone> FieldPatch<T> {
    /// Merge against the current stored value.
    pub fn resolve(&self, current: &Option<T>) -> Option<T> {
        match self {
            FieldPatch::Unchanged => current.clone(),
            FieldPatch::Clear => None,
            FieldPatch::Set(v) => Some(v.clone()),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldPatch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(v) => FieldPatch::Set(v),
            None => FieldPatch::Clear,
        })
    }
}
