//! Room coordinator actor.
//!
//! Owns the room registry and every running battle. All mutations arrive
//! through the mailbox and are applied on this single task; a ticker drives
//! countdowns and disconnect grace deadlines. Ledger writes never happen
//! here: request-path calls run in the connection handlers before a message
//! is sent, and settlement runs in per-room workers.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use duelgrid_bridge::{spawn_settlement, ContractBridge, EvmLedger, PendingMove, SettlementHandle};
use duelgrid_engine::{
    ComboScaledDamage, CountdownStep, DisconnectOutcome, LeaveOutcome, RoomError, RoomRegistry,
    TurnEnd,
};
use duelgrid_types::{
    BattleState, Participant, RoomCode, RoomStatus, ServerEvent, TimeoutPolicy,
};
use ethers::types::U256;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::ingress::{CoordinatorError, Mailbox, Message, RoomOpened};

const MAILBOX_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct RoomChannels {
    events: broadcast::Sender<ServerEvent>,
    settlement: Option<SettlementHandle>,
}

struct ActionReport {
    player_id: String,
    ability_id: u32,
    damage: u32,
    new_health: u32,
    extra_turn: bool,
    battle: BattleState,
    ability_index: Option<u32>,
    contract_match_id: Option<u64>,
    winner: Option<Participant>,
}

pub struct Coordinator {
    registry: RoomRegistry,
    channels: HashMap<RoomCode, RoomChannels>,
    grace: HashMap<RoomCode, HashMap<String, Instant>>,
    mailbox: mpsc::Receiver<Message>,
    policy: TimeoutPolicy,
    damage: ComboScaledDamage,
    ledger: Option<EvmLedger>,
    max_stake_wei: U256,
    rng: StdRng,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Coordinator {
    pub fn new(
        policy: TimeoutPolicy,
        ledger: Option<EvmLedger>,
        max_stake_wei: U256,
    ) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        (
            Self {
                registry: RoomRegistry::new(),
                channels: HashMap::new(),
                grace: HashMap::new(),
                mailbox,
                policy,
                damage: ComboScaledDamage,
                ledger,
                max_stake_wei,
                rng: StdRng::from_entropy(),
            },
            Mailbox::new(sender),
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = interval(self.policy.countdown_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.handle(message);
                }
                _ = ticker.tick() => self.advance_timers(),
            }
        }
    }

    fn broadcast(&self, code: &RoomCode, event: ServerEvent) {
        if let Some(channels) = self.channels.get(code) {
            // Send fails only when nobody is subscribed; that is fine.
            let _ = channels.events.send(event);
        }
    }

    fn drop_room(&mut self, code: &RoomCode) {
        // Dropping the settlement handle lets the worker flush and exit.
        self.channels.remove(code);
        self.grace.remove(code);
    }

    fn cleanup_room(&mut self, code: &RoomCode) {
        self.registry.remove(code);
        self.drop_room(code);
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::CreateRoom {
                host_id,
                host_name,
                room_name,
                is_private,
                stake_wei,
                contract_match_id,
                respond,
            } => {
                let result = self.create_room(
                    &host_id,
                    &host_name,
                    &room_name,
                    is_private,
                    stake_wei,
                    contract_match_id,
                );
                let _ = respond.send(result);
            }
            Message::ListRooms { respond } => {
                let _ = respond.send(self.registry.list_rooms());
            }
            Message::GetRoom { code, respond } => {
                let room = self.registry.get(&code).map(|s| s.snapshot());
                let _ = respond.send(room);
            }
            Message::JoinRoom {
                code,
                player_id,
                player_name,
                respond,
            } => {
                let result = self.join_room(&code, &player_id, &player_name);
                let _ = respond.send(result);
            }
            Message::LeaveRoom {
                code,
                player_id,
                respond,
            } => {
                let _ = respond.send(self.leave(&code, &player_id));
            }
            Message::SelectCharacter {
                code,
                player_id,
                character,
                respond,
            } => {
                let result = match self.registry.get_mut(&code) {
                    None => Err(RoomError::RoomNotFound { code: code.clone() }.into()),
                    Some(session) => session
                        .select_character(&player_id, character.clone())
                        .map(|_| ())
                        .map_err(CoordinatorError::from),
                };
                if result.is_ok() {
                    self.broadcast(
                        &code,
                        ServerEvent::CharacterSelected {
                            player_id,
                            character,
                        },
                    );
                }
                let _ = respond.send(result);
            }
            Message::SetReady {
                code,
                player_id,
                is_ready,
                respond,
            } => {
                let _ = respond.send(self.set_ready(&code, &player_id, is_ready));
            }
            Message::PerformAction {
                code,
                player_id,
                ability_id,
                respond,
            } => {
                let _ = respond.send(self.perform_action(&code, &player_id, ability_id));
            }
            Message::Surrender {
                code,
                player_id,
                respond,
            } => {
                let _ = respond.send(self.finish_by_surrender(&code, &player_id));
            }
            Message::Reconnect {
                code,
                player_id,
                respond,
            } => {
                let _ = respond.send(self.reconnect(&code, &player_id));
            }
            Message::Disconnected { code, player_id } => {
                self.disconnected(&code, &player_id);
            }
        }
    }

    fn create_room(
        &mut self,
        host_id: &str,
        host_name: &str,
        room_name: &str,
        is_private: bool,
        stake_wei: Option<String>,
        contract_match_id: Option<u64>,
    ) -> Result<RoomOpened, CoordinatorError> {
        let session = self.registry.create_room(
            &mut self.rng,
            host_id,
            host_name,
            room_name,
            is_private,
            stake_wei,
            now_ms(),
        )?;
        if let Some(match_id) = contract_match_id {
            session.set_contract_match(match_id);
        }
        let room = session.snapshot();
        let code = room.code.clone();

        let settlement = match (&self.ledger, room.is_staked()) {
            (Some(ledger), true) => {
                let bridge =
                    ContractBridge::new(ledger.clone(), self.policy, self.max_stake_wei);
                let (handle, _task) = spawn_settlement(bridge);
                Some(handle)
            }
            _ => None,
        };

        let (events, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let _ = events.send(ServerEvent::RoomCreated { room: room.clone() });
        self.channels.insert(code, RoomChannels { events, settlement });
        Ok(RoomOpened {
            room,
            events: receiver,
        })
    }

    fn join_room(
        &mut self,
        code: &RoomCode,
        player_id: &str,
        player_name: &str,
    ) -> Result<RoomOpened, CoordinatorError> {
        let (session, participant) = self.registry.join_room(code, player_id, player_name)?;
        let room = session.snapshot();
        let Some(channels) = self.channels.get(code) else {
            warn!(%code, "room has no event channel");
            return Err(CoordinatorError::Unavailable);
        };
        let receiver = channels.events.subscribe();
        let _ = channels.events.send(ServerEvent::RoomJoined { room: room.clone() });
        let _ = channels.events.send(ServerEvent::PlayerJoined { participant });
        Ok(RoomOpened {
            room,
            events: receiver,
        })
    }

    fn leave(&mut self, code: &RoomCode, player_id: &str) -> Result<(), CoordinatorError> {
        // Walking out mid-battle concedes it first.
        if let Some(session) = self.registry.get(code) {
            if session.status() == RoomStatus::Playing {
                return self.finish_by_surrender(code, player_id);
            }
        }
        let outcome = self.registry.leave_room(code, player_id)?;
        match outcome {
            LeaveOutcome::GuestLeft { .. } => {
                self.broadcast(
                    code,
                    ServerEvent::PlayerLeft {
                        player_id: player_id.to_string(),
                    },
                );
            }
            LeaveOutcome::Closed { room, notify } => {
                debug!(%code, notify = notify.len(), "room closed on host leave");
                self.broadcast(
                    code,
                    ServerEvent::PlayerLeft {
                        player_id: player_id.to_string(),
                    },
                );
                self.broadcast(
                    code,
                    ServerEvent::RoomClosed {
                        room_code: room.code.clone(),
                        reason: "host left the room".to_string(),
                    },
                );
                self.drop_room(code);
            }
        }
        Ok(())
    }

    fn set_ready(
        &mut self,
        code: &RoomCode,
        player_id: &str,
        is_ready: bool,
    ) -> Result<(), CoordinatorError> {
        let (outcome, first_tick) = {
            let session = self
                .registry
                .get_mut(code)
                .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
            let outcome = session.set_ready(player_id, is_ready)?;
            // Arming is edge-triggered; this process is the one that starts
            // the countdown, so both sides cannot double-start it.
            let first_tick = if outcome.armed {
                match session.begin_countdown() {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(%code, %err, "countdown failed to start");
                        None
                    }
                }
            } else {
                None
            };
            (outcome, first_tick)
        };

        self.broadcast(
            code,
            ServerEvent::PlayerReadyUpdated {
                player_id: player_id.to_string(),
                is_ready: outcome.is_ready,
            },
        );
        if let Some(value) = first_tick {
            self.broadcast(code, ServerEvent::GameCountdown { countdown: value });
        }
        Ok(())
    }

    fn perform_action(
        &mut self,
        code: &RoomCode,
        player_id: &str,
        ability_id: u32,
    ) -> Result<(), CoordinatorError> {
        let report = {
            let session = self
                .registry
                .get_mut(code)
                .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
            let outcome = session.submit_action(player_id, ability_id, &self.damage)?;
            let battle = session
                .battle_state()
                .cloned()
                .ok_or(CoordinatorError::Unavailable)?;
            let ability_index = session
                .battle()
                .and_then(|b| b.snapshot(outcome.actor).ability_index(ability_id))
                .map(|i| i as u32);
            let winner = match outcome.end {
                TurnEnd::Victory { .. } => session.winner().cloned(),
                TurnEnd::Continue { .. } => None,
            };
            ActionReport {
                player_id: player_id.to_string(),
                ability_id,
                damage: outcome.damage,
                new_health: outcome.new_health,
                extra_turn: outcome.extra_turn,
                battle,
                ability_index,
                contract_match_id: session.room().contract_match_id,
                winner,
            }
        };

        self.broadcast(
            code,
            ServerEvent::GameActionPerformed {
                player_id: report.player_id.clone(),
                ability_id: report.ability_id,
                damage: report.damage,
                new_health: report.new_health,
                extra_turn: report.extra_turn,
                battle: report.battle.clone(),
            },
        );

        // Staked rooms also settle the move on the ledger, fire-and-forget.
        if let (Some(match_id), Some(ability_index)) =
            (report.contract_match_id, report.ability_index)
        {
            if let Some(handle) = self
                .channels
                .get(code)
                .and_then(|c| c.settlement.as_ref())
            {
                handle.submit_move(PendingMove {
                    match_id,
                    ability_index: ability_index as u8,
                    turn: report.battle.turn,
                });
            }
            self.broadcast(
                code,
                ServerEvent::ContractMovePerformed {
                    player_id: report.player_id.clone(),
                    ability_index,
                    damage: report.damage,
                    new_health: report.new_health,
                },
            );
        }

        if let Some(winner) = report.winner {
            self.broadcast(
                code,
                ServerEvent::GameOver {
                    winner_id: winner.id.clone(),
                    winner_name: winner.name.clone(),
                },
            );
            self.cleanup_room(code);
        }
        Ok(())
    }

    fn finish_by_surrender(
        &mut self,
        code: &RoomCode,
        player_id: &str,
    ) -> Result<(), CoordinatorError> {
        let winner = {
            let session = self
                .registry
                .get_mut(code)
                .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
            session.surrender(player_id)?;
            session.winner().cloned()
        };
        if let Some(winner) = winner {
            self.broadcast(
                code,
                ServerEvent::GameOver {
                    winner_id: winner.id.clone(),
                    winner_name: winner.name.clone(),
                },
            );
        }
        self.cleanup_room(code);
        Ok(())
    }

    fn reconnect(
        &mut self,
        code: &RoomCode,
        player_id: &str,
    ) -> Result<RoomOpened, CoordinatorError> {
        let room = {
            let session = self
                .registry
                .get_mut(code)
                .ok_or_else(|| RoomError::RoomNotFound { code: code.clone() })?;
            session.handle_reconnect(player_id)?;
            session.snapshot()
        };
        if let Some(deadlines) = self.grace.get_mut(code) {
            if deadlines.remove(player_id).is_some() {
                debug!(%code, player_id, "reconnect cleared pending forfeit");
            }
        }
        let Some(channels) = self.channels.get(code) else {
            return Err(CoordinatorError::Unavailable);
        };
        Ok(RoomOpened {
            room,
            events: channels.events.subscribe(),
        })
    }

    fn disconnected(&mut self, code: &RoomCode, player_id: &str) {
        let outcome = {
            let Some(session) = self.registry.get_mut(code) else {
                return;
            };
            match session.handle_disconnect(player_id) {
                Ok(outcome) => outcome,
                Err(err) => {
                    debug!(%code, player_id, %err, "disconnect for unknown player");
                    return;
                }
            }
        };
        match outcome {
            DisconnectOutcome::LeftBeforeBattle { .. } => {
                if let Err(err) = self.leave(code, player_id) {
                    debug!(%code, player_id, %err, "leave on disconnect failed");
                }
            }
            DisconnectOutcome::CountdownCancelled { .. } => {
                self.broadcast(
                    code,
                    ServerEvent::RoomClosed {
                        room_code: code.clone(),
                        reason: "player disconnected during countdown".to_string(),
                    },
                );
                self.cleanup_room(code);
            }
            DisconnectOutcome::GraceStarted { .. } => {
                let deadline = Instant::now() + self.policy.disconnect_grace;
                self.grace
                    .entry(code.clone())
                    .or_default()
                    .insert(player_id.to_string(), deadline);
                self.broadcast(
                    code,
                    ServerEvent::PlayerLeft {
                        player_id: player_id.to_string(),
                    },
                );
            }
            DisconnectOutcome::AlreadyOver => {}
        }
    }

    fn advance_timers(&mut self) {
        self.advance_countdowns();
        self.expire_grace();
    }

    fn advance_countdowns(&mut self) {
        let counting: Vec<RoomCode> = self
            .registry
            .sessions()
            .filter(|s| s.status() == RoomStatus::CountingDown)
            .map(|s| s.code().clone())
            .collect();
        for code in counting {
            let step = {
                let Some(session) = self.registry.get_mut(&code) else {
                    continue;
                };
                match session.tick_countdown() {
                    Ok(CountdownStep::Tick(value)) => (Some(value), None),
                    Ok(CountdownStep::Started) => (Some(0), Some(session.snapshot())),
                    Err(err) => {
                        warn!(%code, %err, "countdown tick failed");
                        continue;
                    }
                }
            };
            if let (Some(value), room) = step {
                self.broadcast(&code, ServerEvent::GameCountdown { countdown: value });
                if let Some(room) = room {
                    self.broadcast(&code, ServerEvent::GameStarted { room });
                }
            }
        }
    }

    fn expire_grace(&mut self) {
        let now = Instant::now();
        let expired: Vec<(RoomCode, String)> = self
            .grace
            .iter()
            .flat_map(|(code, deadlines)| {
                deadlines
                    .iter()
                    .filter(move |(_, deadline)| **deadline <= now)
                    .map(move |(player_id, _)| (code.clone(), player_id.clone()))
            })
            .collect();
        for (code, player_id) in expired {
            if let Some(deadlines) = self.grace.get_mut(&code) {
                deadlines.remove(&player_id);
            }
            let result = {
                let Some(session) = self.registry.get_mut(&code) else {
                    continue;
                };
                match session.forfeit_disconnected(&player_id) {
                    Ok(_) => Some((session.winner().cloned(), session.room().contract_match_id)),
                    Err(err) => {
                        debug!(%code, player_id, %err, "grace forfeit skipped");
                        None
                    }
                }
            };
            let Some((winner, contract_match_id)) = result else {
                continue;
            };
            debug!(%code, player_id, "disconnect grace expired; forfeiting");
            if let Some(match_id) = contract_match_id {
                if let Some(handle) = self
                    .channels
                    .get(&code)
                    .and_then(|c| c.settlement.as_ref())
                {
                    handle.claim_timeout(match_id);
                }
            }
            if let Some(winner) = winner {
                self.broadcast(
                    &code,
                    ServerEvent::GameOver {
                        winner_id: winner.id.clone(),
                        winner_name: winner.name.clone(),
                    },
                );
            }
            self.cleanup_room(&code);
        }
    }
}
