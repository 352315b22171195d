//! License plan (entitlement) reconciliation.
//!
//! Backends that license users per sku accept only the final set of plans
//! that must stay disabled for each sku, never a delta. The reconciler turns
//! a requested add/remove of individual plans into those disabled sets,
//! touching only the skus the request names.

use dirsync_connector::error::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Separator between sku part number and plan name in a plan reference.
pub const PLAN_REFERENCE_SEPARATOR: &str = "::";

/// Plan status meaning "assigned but switched off".
const DISABLED_STATUS: &str = "Disabled";

/// sku id → plan ids.
pub type PlanSets = BTreeMap<String, BTreeSet<String>>;

/// sku id → currently active plan ids.
pub type AssignmentState = PlanSets;

/// sku id → plan ids that must remain disabled.
pub type DisabledPlans = PlanSets;

/// A human-readable plan reference, `"<skuPartNumber>::<planName>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlanReference {
    pub sku_part_number: String,
    pub plan_name: String,
}

impl FromStr for PlanReference {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(PLAN_REFERENCE_SEPARATOR) {
            Some((sku, plan))
                if !sku.trim().is_empty()
                    && !plan.trim().is_empty()
                    && !plan.contains(PLAN_REFERENCE_SEPARATOR) =>
            {
                Ok(Self {
                    sku_part_number: sku.trim().to_string(),
                    plan_name: plan.trim().to_string(),
                })
            }
            _ => Err(ConnectorError::validation(format!(
                "plan reference '{s}' must have the form '<skuPartNumber>::<planName>'"
            ))),
        }
    }
}

impl fmt::Display for PlanReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{PLAN_REFERENCE_SEPARATOR}{}",
            self.sku_part_number, self.plan_name
        )
    }
}

/// One plan of one subscribed sku.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalogEntry {
    pub sku_id: String,
    pub sku_part_number: String,
    pub plan_id: String,
    pub plan_name: String,
    pub status: String,
}

/// Every plan of every sku the tenant subscribes to.
///
/// Fetched fresh for each reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanCatalog {
    entries: Vec<PlanCatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuDocument {
    sku_id: String,
    #[serde(default)]
    sku_part_number: String,
    #[serde(default)]
    service_plans: Vec<ServicePlanDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePlanDocument {
    service_plan_id: String,
    #[serde(default)]
    service_plan_name: String,
    #[serde(default)]
    provisioning_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkuList {
    value: Vec<SkuDocument>,
}

fn parse_sku_list(document: &Value, what: &str) -> ConnectorResult<Vec<SkuDocument>> {
    // Accept both a `{"value": [...]}` envelope and a bare array.
    let parsed = if document.is_array() {
        serde_json::from_value::<Vec<SkuDocument>>(document.clone())
    } else {
        serde_json::from_value::<SkuList>(document.clone()).map(|list| list.value)
    };
    parsed.map_err(|e| ConnectorError::serialization(format!("malformed {what} document: {e}")))
}

impl PlanCatalog {
    #[must_use]
    pub fn new(entries: Vec<PlanCatalogEntry>) -> Self {
        Self { entries }
    }

    /// Parse a subscribed-skus document (`value[].servicePlans[]`).
    pub fn from_subscribed_skus(document: &Value) -> ConnectorResult<Self> {
        let entries = parse_sku_list(document, "subscribed skus")?
            .into_iter()
            .flat_map(|sku| {
                let SkuDocument {
                    sku_id,
                    sku_part_number,
                    service_plans,
                } = sku;
                service_plans.into_iter().map(move |plan| PlanCatalogEntry {
                    sku_id: sku_id.clone(),
                    sku_part_number: sku_part_number.clone(),
                    plan_id: plan.service_plan_id,
                    plan_name: plan.service_plan_name,
                    status: plan.provisioning_status.unwrap_or_default(),
                })
            })
            .collect();
        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[PlanCatalogEntry] {
        &self.entries
    }

    /// sku id → every plan id in the sku.
    #[must_use]
    pub fn available(&self) -> PlanSets {
        let mut available = PlanSets::new();
        for entry in &self.entries {
            available
                .entry(entry.sku_id.clone())
                .or_default()
                .insert(entry.plan_id.clone());
        }
        available
    }

    /// Resolve a reference to `(sku id, plan id)`.
    ///
    /// Sku part numbers and plan names compare case-insensitively.
    #[must_use]
    pub fn resolve(&self, reference: &PlanReference) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .sku_part_number
                    .eq_ignore_ascii_case(&reference.sku_part_number)
                    && entry.plan_name.eq_ignore_ascii_case(&reference.plan_name)
            })
            .map(|entry| (entry.sku_id.as_str(), entry.plan_id.as_str()))
    }
}

/// Parse a license-details document into the active plans per sku.
///
/// Every plan whose status is not `Disabled` counts as active. Skus with no
/// active plan are kept with an empty set: the sku is assigned.
pub fn assignment_state_from_license_details(document: &Value) -> ConnectorResult<AssignmentState> {
    let mut state = AssignmentState::new();
    for sku in parse_sku_list(document, "license details")? {
        let active = state.entry(sku.sku_id).or_default();
        for plan in sku.service_plans {
            let disabled = plan
                .provisioning_status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case(DISABLED_STATUS));
            if !disabled {
                active.insert(plan.service_plan_id);
            }
        }
    }
    Ok(state)
}

/// Requested plan changes for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementDelta {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl EntitlementDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enable(mut self, reference: impl Into<String>) -> Self {
        self.add.push(reference.into());
        self
    }

    #[must_use]
    pub fn disable(mut self, reference: impl Into<String>) -> Self {
        self.remove.push(reference.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Check that every reference parses.
    pub fn validate(&self) -> ConnectorResult<()> {
        parse_all(&self.add)?;
        parse_all(&self.remove)?;
        Ok(())
    }
}

fn parse_all<S: AsRef<str>>(references: &[S]) -> ConnectorResult<Vec<PlanReference>> {
    references.iter().map(|r| r.as_ref().parse()).collect()
}

/// Computes per-sku disabled-plan sets from a requested delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntitlementReconciler;

impl EntitlementReconciler {
    /// Reconcile `add` and `remove` against the current assignment.
    ///
    /// 1. Every sku in `current` is seeded with `available − current`.
    /// 2. Each add enables its plan, seeding an unseeded sku with all of its
    ///    plans disabled first.
    /// 3. Each remove disables its plan, with the same lazy seeding.
    /// 4. Only skus touched by steps 2–3 are returned.
    ///
    /// References that do not parse fail the whole call before anything is
    /// computed. References that parse but name no catalog plan are skipped.
    pub fn reconcile<A, R>(
        current: &AssignmentState,
        catalog: &PlanCatalog,
        add: &[A],
        remove: &[R],
    ) -> ConnectorResult<DisabledPlans>
    where
        A: AsRef<str>,
        R: AsRef<str>,
    {
        let add = parse_all(add)?;
        let remove = parse_all(remove)?;

        let available = catalog.available();

        let mut disabled: DisabledPlans = current
            .iter()
            .map(|(sku, active)| {
                let seed = available
                    .get(sku)
                    .map(|all| all.difference(active).cloned().collect())
                    .unwrap_or_default();
                (sku.clone(), seed)
            })
            .collect();

        let mut touched = BTreeSet::new();

        for reference in &add {
            let Some((sku, plan)) = catalog.resolve(reference) else {
                warn!(reference = %reference, "Plan reference not in catalog, ignored");
                continue;
            };
            disabled
                .entry(sku.to_string())
                .or_insert_with(|| available.get(sku).cloned().unwrap_or_default())
                .remove(plan);
            touched.insert(sku.to_string());
        }

        for reference in &remove {
            let Some((sku, plan)) = catalog.resolve(reference) else {
                warn!(reference = %reference, "Plan reference not in catalog, ignored");
                continue;
            };
            disabled
                .entry(sku.to_string())
                .or_insert_with(|| available.get(sku).cloned().unwrap_or_default())
                .insert(plan.to_string());
            touched.insert(sku.to_string());
        }

        disabled.retain(|sku, _| touched.contains(sku));
        debug!(skus = disabled.len(), "Reconciled entitlement delta");
        Ok(disabled)
    }
}

/// Request body that writes the disabled sets (`assignLicense` shape).
#[must_use]
pub fn assign_license_body(disabled: &DisabledPlans) -> Value {
    let add_licenses: Vec<Value> = disabled
        .iter()
        .map(|(sku, plans)| {
            json!({
                "skuId": sku,
                "disabledPlans": plans.iter().collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "addLicenses": add_licenses,
        "removeLicenses": [],
    })
}
