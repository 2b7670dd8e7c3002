//! Radio sync and offload.
//!
//! The radio's flash only holds a small working set, so the gateway
//! periodically drains its contact and channel tables into the database
//! and clears them, then pushes back the contacts most worth keeping
//! warm (favorites, then the most recently active non-repeaters) so the
//! radio can auto-ACK their direct messages.
//!
//! Also home to the fallback message poll (for radio builds whose
//! messages-waiting push is unreliable) and the periodic advertisement.

use std::time::{Duration, Instant};

use meshgate_db::models::Contact;
use meshgate_db::now_secs;
use meshgate_db::queries::{channels, contacts, messages, settings};
use meshgate_radio::RadioContact;

use crate::error::{GatewayError, Result};
use crate::handlers::{self, radio_contact_to_upsert};
use crate::manager;
use crate::state::Gateway;

/// Full drain-and-offload cadence.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(300);
/// Fallback message poll cadence.
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How often the advert loop re-checks settings.
pub const ADVERT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Minimum spacing between working-set pushes unless forced.
pub const CONTACT_SYNC_THROTTLE: Duration = Duration::from_secs(30);

/// Channel slots in radio flash.
const CHANNEL_SLOTS: u8 = 40;
/// Bound on one drain pass.
const DRAIN_LIMIT: usize = 100;

/// Counts from a working-set push.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContactPushSummary {
    pub loaded: usize,
    pub already_on_radio: usize,
    pub failed: usize,
    pub throttled: bool,
}

/// Drain the radio's contact table into the store, then remove each
/// contact from the radio. Returns (synced, removed).
pub async fn sync_and_offload_contacts(gw: &Gateway) -> Result<(usize, usize)> {
    let link = gw.radio.link().ok_or(GatewayError::RadioUnavailable)?;

    let radio_contacts = link.get_contacts().await?;
    tracing::info!("Found {} contacts on radio", radio_contacts.len());

    let mut synced = 0;
    let mut removed = 0;
    for contact in radio_contacts {
        let key_hex = hex::encode(contact.public_key);

        let upsert = radio_contact_to_upsert(&contact, false, now_secs());
        gw.with_db(move |conn| contacts::upsert(conn, &upsert)).await?;

        let claim_key = key_hex.clone();
        let claimed = gw
            .with_db(move |conn| messages::claim_prefix_messages(conn, &claim_key))
            .await?;
        if claimed > 0 {
            tracing::info!("Claimed {claimed} prefix DM message(s) for {:.12}", key_hex);
        }
        synced += 1;

        match link.remove_contact(contact.public_key).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove contact {:.12}: {e}", key_hex),
        }
    }

    tracing::info!("Synced {synced} contacts, removed {removed} from radio");
    Ok((synced, removed))
}

/// Drain the radio's channel slots into the store and clear them.
/// Returns (synced, cleared).
pub async fn sync_and_offload_channels(gw: &Gateway) -> Result<(usize, usize)> {
    let link = gw.radio.link().ok_or(GatewayError::RadioUnavailable)?;

    let mut synced = 0;
    let mut cleared = 0;
    for index in 0..CHANNEL_SLOTS {
        let Some((name, secret)) = link.get_channel(index).await? else {
            continue;
        };
        if name.is_empty() || secret.iter().all(|&b| b == 0) {
            continue;
        }

        let key_hex = hex::encode(secret).to_uppercase();
        let is_hashtag = name.starts_with('#');
        let upsert_key = key_hex.clone();
        let upsert_name = name.clone();
        gw.with_db(move |conn| {
            channels::upsert(conn, &upsert_key, &upsert_name, is_hashtag, false)
        })
        .await?;
        synced += 1;
        tracing::debug!("Synced channel {:.8}: {name}", key_hex);

        match link.set_channel(index, "", [0u8; 16]).await {
            Ok(()) => cleared += 1,
            Err(e) => tracing::warn!("Failed to clear channel slot {index}: {e}"),
        }
    }

    tracing::info!("Synced {synced} channels, cleared {cleared} from radio");
    Ok((synced, cleared))
}

/// Full drain-and-offload under the shared operation lock, finishing
/// with the Public-channel guarantee.
pub async fn sync_and_offload_all(gw: &Gateway) -> Result<()> {
    let _guard = manager::acquire_operation(gw, "sync-offload", true).await?;
    tracing::info!("Starting full radio sync and offload");

    sync_and_offload_contacts(gw).await?;
    sync_and_offload_channels(gw).await?;
    gw.with_db(channels::ensure_public_channel).await?;
    Ok(())
}

/// Push the host clock to the radio.
pub async fn sync_radio_time(gw: &Gateway) -> bool {
    let Some(link) = gw.radio.link() else {
        tracing::debug!("Cannot sync time: radio not connected");
        return false;
    };
    let now = now_secs() as u32;
    match link.set_time(now).await {
        Ok(()) => {
            tracing::debug!("Synced radio time to {now}");
            true
        }
        Err(e) => {
            tracing::warn!("Failed to sync radio time: {e}");
            false
        }
    }
}

/// Pull queued messages until the radio reports an empty queue (bounded).
pub async fn drain_pending_messages(gw: &Gateway) -> usize {
    let Some(link) = gw.radio.link() else {
        return 0;
    };

    let mut count = 0;
    for _ in 0..DRAIN_LIMIT {
        match link.sync_next_message().await {
            Ok(Some(message)) => {
                count += 1;
                if let Err(e) = handlers::handle_radio_message(gw, message).await {
                    tracing::debug!("Error storing drained message: {e}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Error during message drain: {e}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    count
}

/// One poll pass: ask once, and drain the rest if something was waiting.
pub async fn poll_for_messages(gw: &Gateway) -> usize {
    let Some(link) = gw.radio.link() else {
        return 0;
    };

    match link.sync_next_message().await {
        Ok(Some(message)) => {
            if let Err(e) = handlers::handle_radio_message(gw, message).await {
                tracing::debug!("Error storing polled message: {e}");
            }
            1 + drain_pending_messages(gw).await
        }
        Ok(None) => 0,
        Err(e) => {
            tracing::debug!("Message poll error: {e}");
            0
        }
    }
}

/// Send a flood advertisement, honoring the configured interval unless
/// forced. Returns whether one went out.
pub async fn send_advertisement(gw: &Gateway, force: bool) -> bool {
    let Some(link) = gw.radio.link() else {
        tracing::debug!("Cannot send advertisement: radio not connected");
        return false;
    };

    if !force {
        let Ok(current) = gw.with_db(settings::get).await else {
            return false;
        };
        if current.advert_interval <= 0 {
            tracing::debug!("Advertisement skipped: periodic advertising disabled");
            return false;
        }
        let elapsed = now_secs() - current.last_advert_time;
        if elapsed < current.advert_interval {
            tracing::debug!(
                "Advertisement throttled: {}s remaining",
                current.advert_interval - elapsed
            );
            return false;
        }
    }

    match link.send_advert(true).await {
        Ok(()) => {
            let now = now_secs();
            let result = gw
                .with_db(move |conn| {
                    settings::update(
                        conn,
                        &settings::SettingsUpdate {
                            last_advert_time: Some(now),
                            ..Default::default()
                        },
                    )
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("Failed to record advert time: {e}");
            }
            tracing::info!("Advertisement sent");
            true
        }
        Err(e) => {
            tracing::warn!("Failed to send advertisement: {e}");
            false
        }
    }
}

/// Load favorites plus the most recent non-repeaters into radio flash,
/// bounded by `max_radio_contacts` and throttled between calls.
pub async fn sync_recent_contacts_to_radio(gw: &Gateway, force: bool) -> Result<ContactPushSummary> {
    {
        let mut last = gw
            .contact_sync_last
            .lock()
            .map_err(|_| GatewayError::BadRequest("poisoned throttle lock".into()))?;
        if !force {
            if let Some(at) = *last {
                if at.elapsed() < CONTACT_SYNC_THROTTLE {
                    tracing::debug!("Contact sync throttled");
                    return Ok(ContactPushSummary {
                        throttled: true,
                        ..Default::default()
                    });
                }
            }
        }
        *last = Some(Instant::now());
    }

    if gw.radio.link().is_none() {
        return Err(GatewayError::RadioUnavailable);
    }
    let _guard = manager::acquire_operation(gw, "contact-push", true).await?;
    let link = gw.radio.link().ok_or(GatewayError::RadioUnavailable)?;

    let current = gw.with_db(settings::get).await?;
    let max_contacts = current.max_radio_contacts;

    // Favorites first, then recency.
    let mut candidates: Vec<Contact> = Vec::new();
    for favorite in current.favorites.iter().filter(|f| f.fav_type == "contact") {
        let key = favorite.id.clone();
        if let Some(contact) = gw.with_db(move |conn| contacts::get_by_key(conn, &key)).await? {
            candidates.push(contact);
        }
    }
    let recent = gw
        .with_db(move |conn| contacts::get_recent_non_repeaters(conn, max_contacts))
        .await?;
    for contact in recent {
        if !candidates.iter().any(|c| c.public_key == contact.public_key) {
            candidates.push(contact);
        }
    }
    candidates.truncate(max_contacts.max(0) as usize);
    tracing::debug!("Found {} working-set candidates", candidates.len());

    let mut summary = ContactPushSummary::default();
    for contact in candidates {
        if contact.on_radio {
            summary.already_on_radio += 1;
            continue;
        }
        let Some(radio_contact) = contact_to_radio(&contact) else {
            summary.failed += 1;
            continue;
        };
        match link.add_contact(&radio_contact).await {
            Ok(()) => {
                summary.loaded += 1;
                let key = contact.public_key.clone();
                gw.with_db(move |conn| contacts::set_on_radio(conn, &key, true))
                    .await?;
                tracing::debug!("Loaded contact {:.12} to radio", contact.public_key);
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!("Failed to load contact {:.12}: {e}", contact.public_key);
            }
        }
    }

    if summary.loaded > 0 || summary.failed > 0 {
        tracing::info!(
            "Contact sync: loaded {}, already on radio {}, failed {}",
            summary.loaded,
            summary.already_on_radio,
            summary.failed
        );
    }
    Ok(summary)
}

/// Convert a stored contact to the radio's flash record shape.
pub fn contact_to_radio(contact: &Contact) -> Option<RadioContact> {
    let key_bytes = hex::decode(&contact.public_key).ok()?;
    let public_key: [u8; 32] = key_bytes.try_into().ok()?;
    let out_path = contact
        .last_path
        .as_deref()
        .and_then(|p| hex::decode(p).ok())
        .unwrap_or_default();

    Some(RadioContact {
        public_key,
        contact_type: contact.contact_type as u8,
        flags: contact.flags as u8,
        out_path_len: contact.last_path_len.clamp(-1, 64) as i8,
        out_path,
        name: contact.name.clone().unwrap_or_default(),
        last_advert: contact.last_advert.unwrap_or(0).max(0) as u32,
        lat_e6: contact.lat.map(|v| (v * 1e6) as i32).unwrap_or(0),
        lon_e6: contact.lon.map(|v| (v * 1e6) as i32).unwrap_or(0),
    })
}

/// Start the 300-second drain-and-offload loop (idempotent).
pub fn start_periodic_sync(gw: &Gateway) {
    let gw_clone = gw.clone();
    if gw.tasks.start("periodic-sync", move || {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SYNC_INTERVAL).await;
                tracing::debug!("Running periodic radio sync");
                if let Err(e) = sync_and_offload_all(&gw_clone).await {
                    tracing::error!("Error in periodic sync, continuing: {e}");
                }
                sync_radio_time(&gw_clone).await;
            }
        })
    }) {
        tracing::info!("Started periodic radio sync (interval: {}s)", SYNC_INTERVAL.as_secs());
    }
}

/// Start the 5-second fallback poll loop (idempotent). Paused while a
/// repeater operation needs the radio quiet.
pub fn start_message_polling(gw: &Gateway) {
    let gw_clone = gw.clone();
    if gw.tasks.start("message-poll", move || {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(MESSAGE_POLL_INTERVAL).await;
                if gw_clone.radio.is_connected() && !gw_clone.poll_pause.is_paused() {
                    poll_for_messages(&gw_clone).await;
                }
            }
        })
    }) {
        tracing::info!(
            "Started periodic message polling (interval: {}s)",
            MESSAGE_POLL_INTERVAL.as_secs()
        );
    }
}

/// Start the advertisement check loop (idempotent). Throttling itself
/// lives in [`send_advertisement`], driven by settings.
pub fn start_periodic_advert(gw: &Gateway) {
    let gw_clone = gw.clone();
    if gw.tasks.start("periodic-advert", move || {
        tokio::spawn(async move {
            loop {
                if gw_clone.radio.is_connected() {
                    send_advertisement(&gw_clone, false).await;
                }
                tokio::time::sleep(ADVERT_CHECK_INTERVAL).await;
            }
        })
    }) {
        tracing::info!("Started periodic advertisement task");
    }
}
