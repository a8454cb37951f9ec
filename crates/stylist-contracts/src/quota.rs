use serde::Serialize;
use serde_json::Value;

use crate::store::{
    read_count, read_flag, KeyValueStore, StateBatch, GENERATION_COUNT_KEY, IS_PRO_KEY,
    MAX_GENERATIONS_KEY,
};

pub const DEFAULT_GENERATION_CAP: u64 = 10;
pub const BONUS_GENERATIONS: u64 = 30;
pub const UNLIMITED_CODE: &str = "STILIST";
pub const BONUS_CODE: &str = "TEST30";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Unlimited,
    Bonus { added: u64, cap: u64 },
    Invalid,
}

impl RedeemOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub fn heading(&self) -> &'static str {
        if self.is_success() {
            "Success!"
        } else {
            "Error"
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unlimited => {
                "PRO access code applied! All limits have been lifted.".to_string()
            }
            Self::Bonus { added, .. } => format!("{added} generations have been added!"),
            Self::Invalid => "Invalid promo code.".to_string(),
        }
    }
}

/// Free-generation counter plus entitlement flag.
///
/// `used` only moves through [`QuotaLedger::record_generation`]; `cap` only
/// grows. Under the unlimited entitlement neither is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLedger {
    pub used: u64,
    pub cap: u64,
    pub unlimited: bool,
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self {
            used: 0,
            cap: DEFAULT_GENERATION_CAP,
            unlimited: false,
        }
    }
}

impl QuotaLedger {
    pub fn load(store: &mut dyn KeyValueStore) -> Self {
        let cap = match read_count(store, MAX_GENERATIONS_KEY, DEFAULT_GENERATION_CAP) {
            0 => DEFAULT_GENERATION_CAP,
            cap => cap,
        };
        Self {
            used: read_count(store, GENERATION_COUNT_KEY, 0),
            cap,
            unlimited: read_flag(store, IS_PRO_KEY, false),
        }
    }

    /// Adds the ledger's three keys to `batch`.
    pub fn stage(&self, batch: &mut StateBatch) {
        batch
            .put(GENERATION_COUNT_KEY, Value::from(self.used))
            .put(MAX_GENERATIONS_KEY, Value::from(self.cap))
            .put(IS_PRO_KEY, Value::Bool(self.unlimited));
    }

    pub fn persist(&self, store: &mut dyn KeyValueStore) -> anyhow::Result<()> {
        let mut batch = StateBatch::new();
        self.stage(&mut batch);
        store.commit(batch)
    }

    pub fn can_generate(&self) -> bool {
        self.unlimited || self.used < self.cap
    }

    pub fn record_generation(&mut self) {
        if self.unlimited {
            return;
        }
        self.used = self.used.saturating_add(1);
    }

    pub fn remaining(&self) -> u64 {
        self.cap.saturating_sub(self.used)
    }

    /// Matches `code` case-insensitively after trimming. The bonus code stacks
    /// on every redemption.
    pub fn redeem(&mut self, code: &str) -> RedeemOutcome {
        let normalized = code.trim().to_uppercase();
        if normalized == UNLIMITED_CODE {
            self.unlimited = true;
            return RedeemOutcome::Unlimited;
        }
        if normalized == BONUS_CODE {
            self.cap = self.cap.saturating_add(BONUS_GENERATIONS);
            return RedeemOutcome::Bonus {
                added: BONUS_GENERATIONS,
                cap: self.cap,
            };
        }
        RedeemOutcome::Invalid
    }
}
