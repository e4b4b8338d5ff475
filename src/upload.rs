use serde::Serialize;

use crate::identity::MachineIdentity;
use crate::store::LedgerTotals;

/// 推送到远端账本的绝对值载荷。推绝对值而非增量，
/// 崩溃或重复推送后结果不变（幂等）。
#[derive(Clone, Debug, Serialize)]
pub struct LedgerUpload {
    pub machine_id: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    pub location: String,
    pub machine_name: String,
    pub water_coins: u64,
    pub foaming_coins: u64,
    pub total_earnings: u64,
    pub updated_at: String,
}

impl LedgerUpload {
    pub fn new(identity: &MachineIdentity, totals: &LedgerTotals, epoch_secs: u64) -> Self {
        Self {
            machine_id: identity.machine_id.clone(),
            owner_id: identity.owner_id.clone(),
            location: identity.location.clone(),
            machine_name: identity.machine_name.clone(),
            water_coins: totals.water_coins,
            foaming_coins: totals.foaming_coins,
            total_earnings: totals.total_earnings(),
            updated_at: epoch_secs.to_string(),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
