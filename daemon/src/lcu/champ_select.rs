//! Champion select: hover the configured champion for the assigned role and
//! lock it in shortly before the pick timer runs out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};

use super::api::{patch_action, Requester};
use super::connection::EventConnection;
use super::delay::DelayedAction;
use super::event::{EventKind, EventKinds, LcuEvent, Topic};
use super::handler::FeatureHandler;
use crate::config::{Role, RolePreference, SharedSettings};

pub const CHAMP_SELECT_SESSION_URI: &str = "/lol-champ-select/v1/session";

/// Lock this long before the pick phase ends.
pub const AUTO_LOCK_THRESHOLD_MS: i64 = 5000;
/// Assumed time left when the payload carries no timer.
const MISSING_TIMER_MS: i64 = 99_999;

const ACTION_PICK: &str = "pick";
const ACTION_BAN: &str = "ban";

// ── Payload ───────────────────────────────────────────────────────────────────

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The subset of `/lol-champ-select/v1/session` this handler reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampSelectSession {
    #[serde(default)]
    pub local_player_cell_id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub my_team: Vec<TeamMember>,
    #[serde(default, deserialize_with = "null_default")]
    pub actions: Vec<Vec<Action>>,
    #[serde(default)]
    pub timer: Option<Timer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(default)]
    pub cell_id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub assigned_position: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: i64,
    #[serde(default)]
    pub actor_cell_id: Option<i64>,
    /// `0` means nothing selected.
    #[serde(default, deserialize_with = "null_default")]
    pub champion_id: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub completed: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub is_in_progress: bool,
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
}

impl Action {
    fn is_pick(&self) -> bool {
        self.kind == ACTION_PICK
    }

    fn is_ban(&self) -> bool {
        self.kind == ACTION_BAN
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    #[serde(default)]
    pub adjusted_time_left_in_phase: Option<f64>,
}

impl ChampSelectSession {
    fn all_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().flatten()
    }

    fn time_left_ms(&self) -> i64 {
        self.timer
            .as_ref()
            .and_then(|t| t.adjusted_time_left_in_phase)
            .map(|ms| ms as i64)
            .unwrap_or(MISSING_TIMER_MS)
    }
}

// ── Selection rules ───────────────────────────────────────────────────────────

/// The local player's assigned role. `None` in blind pick.
pub fn assigned_role(session: &ChampSelectSession) -> Option<Role> {
    let local = session.local_player_cell_id?;
    let member = session.my_team.iter().find(|m| m.cell_id == Some(local))?;
    Role::from_position(&member.assigned_position)
}

/// Champions taken by a completed ban (anyone's) or a completed pick by
/// another player.
pub fn unavailable_champions(session: &ChampSelectSession) -> HashSet<i64> {
    let local = session.local_player_cell_id;
    session
        .all_actions()
        .filter(|a| a.completed && a.champion_id != 0)
        .filter(|a| a.is_ban() || (a.is_pick() && a.actor_cell_id != local))
        .map(|a| a.champion_id)
        .collect()
}

/// Primary if available, else secondary if available.
pub fn choose_champion(preference: RolePreference, unavailable: &HashSet<i64>) -> Option<i64> {
    [preference.primary, preference.secondary]
        .into_iter()
        .flatten()
        .find(|id| *id != 0 && !unavailable.contains(id))
}

/// The local player's first pick action that is not completed yet.
pub fn own_pending_pick(session: &ChampSelectSession) -> Option<&Action> {
    let local = session.local_player_cell_id?;
    session
        .all_actions()
        .find(|a| a.actor_cell_id == Some(local) && a.is_pick() && !a.completed)
}

/// How long to wait before locking, or `None` when it is already too late.
pub fn lock_delay(time_left_ms: i64) -> Option<Duration> {
    let delay = time_left_ms - AUTO_LOCK_THRESHOLD_MS;
    (delay > 0).then(|| Duration::from_millis(delay as u64))
}

// ── Handler ───────────────────────────────────────────────────────────────────

struct PendingLock {
    action_id: i64,
    champion_id: i64,
    action: DelayedAction,
}

#[derive(Default)]
struct ChampSelectState {
    hovered: bool,
    locked: bool,
    /// Bumped on every reset so a late lock cannot mark a newer session.
    generation: u64,
    pending_lock: Option<PendingLock>,
}

impl ChampSelectState {
    fn reset(&mut self) {
        self.hovered = false;
        self.locked = false;
        self.generation += 1;
        if let Some(pending) = self.pending_lock.take() {
            pending.action.cancel();
        }
    }
}

#[derive(Clone)]
pub struct ChampSelectHandler {
    settings: SharedSettings,
    state: Arc<Mutex<ChampSelectState>>,
}

impl ChampSelectHandler {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(ChampSelectState::default())),
        }
    }

    #[cfg(test)]
    pub fn hovered_this_session(&self) -> bool {
        self.state.lock().hovered
    }

    #[cfg(test)]
    pub fn locked_this_session(&self) -> bool {
        self.state.lock().locked
    }

    /// `(action_id, champion_id, delay)` of the lock waiting to fire.
    #[cfg(test)]
    pub fn pending_lock(&self) -> Option<(i64, i64, Duration)> {
        let state = self.state.lock();
        state
            .pending_lock
            .as_ref()
            .filter(|p| !p.action.is_finished())
            .map(|p| (p.action_id, p.champion_id, p.action.delay()))
    }

    pub async fn handle(&self, api: Arc<dyn Requester>, event: &LcuEvent) {
        let settings = self.settings.read().await.clone();
        if !settings.auto_pick_enabled {
            tracing::debug!("auto-pick disabled, ignoring champion select");
            return;
        }

        if event.kind == EventKind::Create {
            self.state.lock().reset();
            tracing::info!("entered champion select");
        }

        if self.state.lock().locked {
            return;
        }

        let session: ChampSelectSession = match serde_json::from_value(event.data.clone()) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable champion select payload");
                return;
            }
        };

        let Some(role) = assigned_role(&session) else {
            tracing::debug!("no assigned position (blind pick?)");
            return;
        };

        let preference = settings.role_preference(role);
        if preference.is_empty() {
            tracing::debug!(role = role.as_str(), "no champion configured for role");
            return;
        }

        let unavailable = unavailable_champions(&session);
        let Some(champion_id) = choose_champion(preference, &unavailable) else {
            tracing::debug!(role = role.as_str(), ?unavailable, "configured champions unavailable");
            return;
        };

        let Some(action) = own_pending_pick(&session) else {
            tracing::debug!("no pending pick action");
            return;
        };
        tracing::debug!(
            action_id = action.id,
            in_progress = action.is_in_progress,
            current = action.champion_id,
            time_left_ms = session.time_left_ms(),
            "own pick action"
        );

        let should_hover =
            action.is_in_progress && action.champion_id == 0 && !self.state.lock().hovered;
        if should_hover {
            match patch_action(api.as_ref(), action.id, champion_id, false).await {
                Ok(()) => {
                    self.state.lock().hovered = true;
                    tracing::info!(champion_id, role = role.as_str(), "hovered champion");
                }
                Err(e) => tracing::warn!(error = %e, champion_id, "failed to hover champion"),
            }
        }

        if !action.is_in_progress {
            self.cancel_pending_lock();
        } else if settings.auto_lock_enabled && action.champion_id != 0 {
            self.schedule_lock(api, action.id, action.champion_id, session.time_left_ms());
        }
    }

    fn cancel_pending_lock(&self) {
        if let Some(pending) = self.state.lock().pending_lock.take() {
            if pending.action.cancel() {
                tracing::debug!(
                    action_id = pending.action_id,
                    champion_id = pending.champion_id,
                    "cancelled auto-lock"
                );
            }
        }
    }

    fn schedule_lock(&self, api: Arc<dyn Requester>, action_id: i64, champion_id: i64, time_left_ms: i64) {
        let mut state = self.state.lock();
        if state
            .pending_lock
            .as_ref()
            .is_some_and(|p| !p.action.is_finished())
        {
            return;
        }
        let Some(delay) = lock_delay(time_left_ms) else {
            return;
        };

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let action = DelayedAction::schedule(delay, move || async move {
            {
                let state = shared.lock();
                if state.locked || state.generation != generation {
                    return;
                }
            }
            match patch_action(api.as_ref(), action_id, champion_id, true).await {
                Ok(()) => {
                    let mut state = shared.lock();
                    if state.generation == generation {
                        state.locked = true;
                    }
                    tracing::info!(champion_id, "locked champion");
                }
                Err(e) => tracing::warn!(error = %e, champion_id, "failed to lock champion"),
            }
        });
        tracing::debug!(
            action_id,
            champion_id,
            delay_ms = action.delay().as_millis() as u64,
            "scheduled auto-lock"
        );
        state.pending_lock = Some(PendingLock {
            action_id,
            champion_id,
            action,
        });
    }
}

impl FeatureHandler for ChampSelectHandler {
    fn name(&self) -> &'static str {
        "champ-select"
    }

    fn on_session_start(&self) {
        self.state.lock().reset();
    }

    fn register_subscriptions(&self, conn: &mut EventConnection) {
        let this = self.clone();
        conn.subscribe(
            Topic::exact(CHAMP_SELECT_SESSION_URI),
            EventKinds::CREATE | EventKinds::UPDATE,
            move |api: Arc<dyn Requester>, event: LcuEvent| {
                let this = this.clone();
                async move {
                    this.handle(api, &event).await;
                    Ok(())
                }
            },
        );
    }

    fn on_disconnect(&self) {
        self.state.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::lcu::testing::FakeRequester;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use tokio::sync::RwLock;

    const LOCAL: i64 = 2;

    fn settings(preference: RolePreference, auto_lock: bool) -> SharedSettings {
        let mut default_champions = BTreeMap::new();
        default_champions.insert(Role::Middle, preference);
        Arc::new(RwLock::new(Settings {
            auto_lock_enabled: auto_lock,
            default_champions,
            ..Settings::default()
        }))
    }

    fn pref(primary: Option<i64>, secondary: Option<i64>) -> RolePreference {
        RolePreference { primary, secondary }
    }

    /// Session where the local player is mid and owns pick action 10.
    fn session_json(own_pick: Value, others: Vec<Value>, time_left: Option<i64>) -> Value {
        let mut group = vec![own_pick];
        group.extend(others);
        let mut session = json!({
            "localPlayerCellId": LOCAL,
            "myTeam": [
                { "cellId": 1, "assignedPosition": "top" },
                { "cellId": LOCAL, "assignedPosition": "middle" }
            ],
            "actions": [group],
        });
        if let Some(ms) = time_left {
            session["timer"] = json!({ "adjustedTimeLeftInPhase": ms });
        }
        session
    }

    fn own_pick(champion_id: i64, in_progress: bool) -> Value {
        json!({
            "id": 10, "actorCellId": LOCAL, "championId": champion_id,
            "completed": false, "isInProgress": in_progress, "type": "pick"
        })
    }

    fn completed(kind: &str, actor: i64, champion_id: i64) -> Value {
        json!({
            "id": 100 + champion_id, "actorCellId": actor, "championId": champion_id,
            "completed": true, "isInProgress": false, "type": kind
        })
    }

    fn event(kind: EventKind, data: Value) -> LcuEvent {
        LcuEvent {
            kind,
            uri: CHAMP_SELECT_SESSION_URI.to_string(),
            data,
        }
    }

    fn decode(data: Value) -> ChampSelectSession {
        serde_json::from_value(data).unwrap()
    }

    // ── Selection rules ───────────────────────────────────────────────────────

    #[test]
    fn role_comes_from_local_cell() {
        let session = decode(session_json(own_pick(0, true), vec![], None));
        assert_eq!(assigned_role(&session), Some(Role::Middle));
    }

    #[test]
    fn blind_pick_has_no_role() {
        let session = decode(json!({
            "localPlayerCellId": 0,
            "myTeam": [{ "cellId": 0, "assignedPosition": "" }],
            "actions": []
        }));
        assert_eq!(assigned_role(&session), None);
    }

    #[test]
    fn unavailable_counts_completed_bans_and_other_picks_only() {
        let session = decode(session_json(
            own_pick(0, true),
            vec![
                completed("ban", LOCAL, 1),
                completed("ban", 7, 2),
                completed("pick", 7, 3),
                completed("pick", LOCAL, 4),
                completed("ban", 7, 0),
                json!({ "id": 50, "actorCellId": 7, "championId": 5,
                        "completed": false, "isInProgress": true, "type": "pick" }),
            ],
            None,
        ));
        let unavailable = unavailable_champions(&session);
        assert_eq!(unavailable, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn choose_falls_back_to_secondary() {
        let unavailable = HashSet::from([1, 2]);
        assert_eq!(choose_champion(pref(Some(1), Some(3)), &unavailable), Some(3));
        assert_eq!(choose_champion(pref(Some(1), Some(2)), &unavailable), None);
        assert_eq!(choose_champion(pref(Some(5), Some(3)), &unavailable), Some(5));
        assert_eq!(choose_champion(pref(None, Some(3)), &unavailable), Some(3));
        assert_eq!(choose_champion(pref(None, None), &unavailable), None);
    }

    #[test]
    fn lock_delay_subtracts_threshold() {
        assert_eq!(lock_delay(8000), Some(Duration::from_millis(3000)));
        assert_eq!(lock_delay(5000), None);
        assert_eq!(lock_delay(1200), None);
    }

    #[test]
    fn payload_tolerates_nulls_and_missing_fields() {
        let session = decode(json!({
            "localPlayerCellId": null,
            "myTeam": null,
            "actions": [[{ "id": 1, "championId": null, "type": null }]],
            "timer": null
        }));
        assert!(session.my_team.is_empty());
        assert_eq!(session.actions[0][0].champion_id, 0);
        assert_eq!(session.time_left_ms(), MISSING_TIMER_MS);
    }

    // ── Handler ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn hovers_once_when_turn_starts() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());

        let data = session_json(own_pick(0, true), vec![], Some(30_000));
        handler.handle(api.clone(), &event(EventKind::Create, data.clone())).await;
        handler.handle(api.clone(), &event(EventKind::Update, data)).await;

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/lol-champ-select/v1/session/actions/10");
        assert_eq!(calls[0].body, Some(json!({ "championId": 103, "completed": false })));
        assert!(handler.hovered_this_session());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_preferences_issue_no_hover() {
        let handler = ChampSelectHandler::new(settings(pref(Some(1), Some(2)), true));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(
            own_pick(0, true),
            vec![completed("ban", 7, 1), completed("pick", 7, 2)],
            Some(30_000),
        );
        handler.handle(api.clone(), &event(EventKind::Create, data)).await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hovers_secondary_when_primary_banned() {
        let handler = ChampSelectHandler::new(settings(pref(Some(1), Some(3)), true));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(
            own_pick(0, true),
            vec![completed("ban", 7, 1), completed("ban", 8, 2)],
            Some(30_000),
        );
        handler.handle(api.clone(), &event(EventKind::Create, data)).await;
        assert_eq!(api.calls()[0].body, Some(json!({ "championId": 3, "completed": false })));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_selection_is_not_overwritten() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), false));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(own_pick(55, true), vec![], Some(30_000));
        handler.handle(api.clone(), &event(EventKind::Create, data)).await;
        assert!(api.calls().is_empty());
        assert!(!handler.hovered_this_session());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hover_retries_on_next_event() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());
        api.fail_next(500);
        let data = session_json(own_pick(0, true), vec![], Some(30_000));

        handler.handle(api.clone(), &event(EventKind::Create, data.clone())).await;
        assert!(!handler.hovered_this_session());
        handler.handle(api.clone(), &event(EventKind::Update, data)).await;
        assert!(handler.hovered_this_session());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_auto_pick_ignores_everything() {
        let shared = settings(pref(Some(103), None), true);
        shared.write().await.auto_pick_enabled = false;
        let handler = ChampSelectHandler::new(shared);
        let api = Arc::new(FakeRequester::new());
        let data = session_json(own_pick(0, true), vec![], Some(30_000));
        handler.handle(api.clone(), &event(EventKind::Create, data)).await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_fires_once_after_computed_delay() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(own_pick(103, true), vec![], Some(8000));

        handler.handle(api.clone(), &event(EventKind::Update, data.clone())).await;
        assert_eq!(handler.pending_lock(), Some((10, 103, Duration::from_millis(3000))));

        // Further updates keep the existing timer.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        handler.handle(api.clone(), &event(EventKind::Update, data)).await;
        assert_eq!(handler.pending_lock().map(|p| p.2), Some(Duration::from_millis(3000)));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body, Some(json!({ "championId": 103, "completed": true })));
        assert!(handler.locked_this_session());
        assert_eq!(handler.pending_lock(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_ending_cancels_pending_lock() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());

        let ours = session_json(own_pick(103, true), vec![], Some(8000));
        handler.handle(api.clone(), &event(EventKind::Update, ours)).await;
        assert!(handler.pending_lock().is_some());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let not_ours = session_json(own_pick(103, false), vec![], Some(6000));
        handler.handle(api.clone(), &event(EventKind::Update, not_ours)).await;
        assert_eq!(handler.pending_lock(), None);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert!(api.calls().is_empty());
        assert!(!handler.locked_this_session());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_lock() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(own_pick(103, true), vec![], Some(8000));
        handler.handle(api.clone(), &event(EventKind::Update, data)).await;

        handler.on_disconnect();
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert!(api.calls().is_empty());
        assert!(!handler.hovered_this_session());
    }

    #[tokio::test(start_paused = true)]
    async fn no_lock_scheduled_inside_threshold_or_when_disabled() {
        let api = Arc::new(FakeRequester::new());

        let late = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let data = session_json(own_pick(103, true), vec![], Some(4000));
        late.handle(api.clone(), &event(EventKind::Update, data)).await;
        assert_eq!(late.pending_lock(), None);

        let disabled = ChampSelectHandler::new(settings(pref(Some(103), None), false));
        let data = session_json(own_pick(103, true), vec![], Some(30_000));
        disabled.handle(api.clone(), &event(EventKind::Update, data)).await;
        assert_eq!(disabled.pending_lock(), None);

        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn locked_session_ignores_events_until_create() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());
        let data = session_json(own_pick(103, true), vec![], Some(6000));
        handler.handle(api.clone(), &event(EventKind::Update, data)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(handler.locked_this_session());

        let fresh = session_json(own_pick(0, true), vec![], Some(30_000));
        handler.handle(api.clone(), &event(EventKind::Update, fresh.clone())).await;
        assert_eq!(api.calls().len(), 1);

        handler.handle(api.clone(), &event(EventKind::Create, fresh)).await;
        assert!(!handler.locked_this_session());
        assert!(handler.hovered_this_session());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_payload_is_ignored() {
        let handler = ChampSelectHandler::new(settings(pref(Some(103), None), true));
        let api = Arc::new(FakeRequester::new());
        handler
            .handle(api.clone(), &event(EventKind::Update, json!({ "actions": "nope" })))
            .await;
        assert!(api.calls().is_empty());
    }
}
