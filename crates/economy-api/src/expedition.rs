//! Fire-and-forget expedition tasks. A member flips to busy, a timer runs in
//! the background, and completion credits the reward and clears the flag.

use std::sync::Arc;

use contracts::ExpeditionTier;
use economy_core::ledger;
use serde_json::Value;
use tracing::{error, warn};

use crate::{member_not_registered, EconomyApi, EconomyError};

impl EconomyApi {
    /// Flip the member to busy and schedule the completion task. The tier
    /// string is validated before any state changes, so a typo leaves the
    /// member idle. Returns the parsed tier so callers can echo its terms.
    pub async fn start_expedition(
        self: &Arc<Self>,
        guild_id: &str,
        member_id: &str,
        tier: &str,
    ) -> Result<ExpeditionTier, EconomyError> {
        let tier: ExpeditionTier = tier.parse()?;

        {
            let lock = self.guild_lock(guild_id).await;
            let _guard = lock.lock().await;

            let mut doc = self.ledger_store.load();
            let members = ledger::members_scope(&mut doc, guild_id, false)?
                .ok_or_else(|| member_not_registered(guild_id, member_id))?;
            let mut record = ledger::read_member(members, member_id)?
                .ok_or_else(|| member_not_registered(guild_id, member_id))?;

            if record.is_on_expedition() {
                return Err(EconomyError::AlreadyOnExpedition {
                    member_id: member_id.to_string(),
                });
            }

            record.set_on_expedition(true);
            ledger::write_member(members, member_id, &record);
            self.ledger_store.save(&doc)?;
        }

        self.send_notice(
            member_id,
            &format!(
                "Expedition started! Returning in {}s.",
                tier.duration().as_secs()
            ),
        );

        let api = Arc::clone(self);
        let guild = guild_id.to_string();
        let member = member_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(tier.duration()).await;
            api.complete_expedition(&guild, &member, tier).await;
        });

        Ok(tier)
    }

    /// Completion half of the background task: credit the reward and clear
    /// the busy flag. The guild may have left or the member record vanished
    /// while the timer ran; that downgrades to a log line, never a panic.
    async fn complete_expedition(&self, guild_id: &str, member_id: &str, tier: ExpeditionTier) {
        let lock = self.guild_lock(guild_id).await;
        let _guard = lock.lock().await;

        let mut doc = self.ledger_store.load();
        let members = match ledger::members_scope(&mut doc, guild_id, false) {
            Ok(Some(members)) => members,
            Ok(None) => {
                warn!(guild_id, member_id, "expedition finished but the guild is gone");
                return;
            }
            Err(err) => {
                error!(guild_id, member_id, error = %err, "expedition completion failed");
                return;
            }
        };

        let mut record = match ledger::read_member(members, member_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(guild_id, member_id, "expedition finished but the member is gone");
                return;
            }
            Err(err) => {
                error!(guild_id, member_id, error = %err, "expedition completion failed");
                return;
            }
        };

        record.coins += tier.reward();
        record.set_on_expedition(false);
        ledger::write_member(members, member_id, &record);

        if let Err(err) = self.ledger_store.save(&doc) {
            error!(guild_id, member_id, error = %err, "expedition completion failed");
            return;
        }

        self.send_notice(
            member_id,
            &format!(
                "You returned from your {} expedition with {} coins!",
                tier,
                tier.reward()
            ),
        );
    }

    /// Startup sweep over the whole ledger: any busy flag found on disk is a
    /// leftover from an unclean shutdown, since completion tasks do not
    /// survive the process. Returns the number of flags cleared.
    pub async fn recover_stale_expeditions(&self) -> Result<usize, EconomyError> {
        let mut doc = self.ledger_store.load();
        let mut cleared = 0;

        if let Some(root) = doc.as_object_mut() {
            for guild in root.values_mut().filter_map(Value::as_object_mut) {
                let Some(members) = guild
                    .get_mut(ledger::MEMBERS_KEY)
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };
                for member in members.values_mut().filter_map(Value::as_object_mut) {
                    if member.get("on_expedition").is_some_and(is_truthy_flag) {
                        member.insert("on_expedition".to_string(), 0.into());
                        cleared += 1;
                    }
                }
            }
        }

        if cleared > 0 {
            self.ledger_store.save(&doc)?;
            warn!(cleared, "cleared stale expedition flags from a previous run");
        }
        Ok(cleared)
    }
}

// Historic documents stored the flag as a bool; anything truthy counts.
fn is_truthy_flag(node: &Value) -> bool {
    match node {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        _ => false,
    }
}
