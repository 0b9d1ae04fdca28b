// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lock-up and unbonding rules shared by every stake-holding entity.
//!
//! Two independent gates apply to principal. The lock-up gate starts when principal is added and
//! must elapse before any reduction can even be requested. The unbonding gate starts when a
//! reduction is requested and must elapse before the tokens are released.

use crate::error::{Result, StakingError};

/// Lock-up expiry after a principal increase at block `now`.
///
/// The expiry only ever grows. Claiming rewards never calls this.
pub fn extend_lockup(now: u64, min_lock_blocks: u64, existing_expiry: u64) -> u64 {
    existing_expiry.max(now.saturating_add(min_lock_blocks))
}

/// Fails with [StakingError::LockupNotElapsed] unless `now >= lockup_expiry`.
pub fn ensure_lockup_elapsed(now: u64, lockup_expiry: u64) -> Result<()> {
    if now < lockup_expiry {
        return Err(StakingError::LockupNotElapsed { expiry: lockup_expiry, now });
    }
    Ok(())
}

/// Block at which a withdrawal requested at `now` is released.
pub fn unbonding_release_block(now: u64, unbonding_blocks: u64) -> u64 {
    now.saturating_add(unbonding_blocks)
}

/// Fails with [StakingError::StillUnbonding] unless `now >= unlock_block`.
pub fn ensure_unbonded(now: u64, unlock_block: u64) -> Result<()> {
    if now < unlock_block {
        return Err(StakingError::StillUnbonding { unlock: unlock_block, now });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockup_only_grows() {
        assert_eq!(extend_lockup(1, 50, 0), 51);
        // Topping up at block 10 with a 50 block programme moves the expiry to 60.
        assert_eq!(extend_lockup(10, 50, 51), 60);
        // A shorter programme never pulls an expiry back in.
        assert_eq!(extend_lockup(10, 0, 60), 60);
    }

    #[test]
    fn lockup_gate_is_inclusive() {
        assert_eq!(
            ensure_lockup_elapsed(50, 51),
            Err(StakingError::LockupNotElapsed { expiry: 51, now: 50 })
        );
        assert!(ensure_lockup_elapsed(51, 51).is_ok());
    }

    #[test]
    fn unbonding_gate_is_additive_to_lockup() {
        let unlock = unbonding_release_block(51, 136_500);
        assert_eq!(unlock, 136_551);
        assert!(matches!(
            ensure_unbonded(136_550, unlock),
            Err(StakingError::StillUnbonding { .. })
        ));
        assert!(ensure_unbonded(unlock, unlock).is_ok());
    }
}
