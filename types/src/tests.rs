use super::*;

fn sample_snapshot(name: &str) -> CharacterSnapshot {
    CharacterSnapshot {
        character_id: 7,
        name: name.to_string(),
        max_health: 100,
        max_mana: 50,
        abilities: vec![
            Ability {
                id: 1,
                name: "Strike".to_string(),
                mana_cost: 10,
                base_damage: 12,
                effect: AbilityEffect::None,
            },
            Ability {
                id: 2,
                name: "Flurry".to_string(),
                mana_cost: 30,
                base_damage: 25,
                effect: AbilityEffect::ExtraTurn,
            },
        ],
    }
}

#[test]
fn test_room_code_normalizes_case() {
    let lower = RoomCode::parse("ab12cd").unwrap();
    let upper = RoomCode::parse("AB12CD").unwrap();
    assert_eq!(lower, upper);
    assert_eq!(lower.as_str(), "AB12CD");
}

#[test]
fn test_room_code_rejects_bad_input() {
    assert!(matches!(
        RoomCode::parse("ABC"),
        Err(RoomCodeError::BadLength { expected: 6, got: 3 })
    ));
    assert!(matches!(
        RoomCode::parse("AB-12D"),
        Err(RoomCodeError::BadCharacter)
    ));
}

#[test]
fn test_room_wire_roundtrip() {
    let code = RoomCode::parse("QX7PL2").unwrap();
    let mut room = Room::new(code, "Alice's Room", "host-1", false, None, 1_700_000);
    room.guest_id = Some("guest-1".to_string());
    room.players.push("guest-1".to_string());
    room.status = RoomStatus::Selecting;
    room.set_character(Role::Host, sample_snapshot("Pyromancer"));

    let encoded = serde_json::to_string(&room).unwrap();
    let decoded: Room = serde_json::from_str(&encoded).unwrap();
    assert_eq!(room, decoded);
}

#[test]
fn test_room_wire_roundtrip_with_stake() {
    let code = RoomCode::parse("A1B2C3").unwrap();
    let mut room = Room::new(
        code,
        "Stakes",
        "host-1",
        true,
        Some("10000000000000000".to_string()),
        42,
    );
    room.contract_match_id = Some(9);

    let encoded = serde_json::to_string(&room).unwrap();
    let decoded: Room = serde_json::from_str(&encoded).unwrap();
    assert_eq!(room, decoded);
    assert!(decoded.is_staked());
}

#[test]
fn test_room_code_roundtrip_case_insensitive_on_wire() {
    // Codes typed lowercase on the wire parse to the same room.
    let decoded: RoomCode = serde_json::from_str("\"qx7pl2\"").unwrap();
    assert_eq!(decoded.as_str(), "QX7PL2");
}

#[test]
fn test_room_invariants() {
    let code = RoomCode::parse("ZZZZZZ").unwrap();
    let mut room = Room::new(code, "r", "host-1", false, None, 0);
    room.players = vec!["a".into(), "b".into(), "c".into()];
    assert!(matches!(
        room.validate_invariants(),
        Err(RoomInvariantError::TooManyPlayers { got: 3, .. })
    ));

    room.players = vec!["a".into(), "b".into()];
    room.status = RoomStatus::Playing;
    assert!(matches!(
        room.validate_invariants(),
        Err(RoomInvariantError::MissingCharacter { role: Role::Host })
    ));
}

#[test]
fn test_character_invariants() {
    let mut snapshot = sample_snapshot("ok");
    snapshot.validate_invariants().expect("valid snapshot");

    snapshot.abilities[1].id = 1;
    assert!(matches!(
        snapshot.validate_invariants(),
        Err(CharacterInvariantError::DuplicateAbilityId { ability_id: 1 })
    ));

    snapshot.abilities.clear();
    assert!(matches!(
        snapshot.validate_invariants(),
        Err(CharacterInvariantError::NoAbilities)
    ));
}

#[test]
fn test_battle_state_initializes_from_snapshots() {
    let host = sample_snapshot("host");
    let guest = sample_snapshot("guest");
    let battle = BattleState::new(&host, &guest);
    assert_eq!(battle.turn_owner, Role::Host);
    assert_eq!(battle.phase, BattlePhase::AwaitingHost);
    assert_eq!(battle.turn, 1);
    assert_eq!(battle.host.health, 100);
    assert_eq!(battle.guest.mana, 50);
    assert_eq!(battle.host.combo, 0);
    assert!(battle.winner.is_none());
}

#[test]
fn test_event_names_match_transport_contract() {
    let event = ServerEvent::GameCountdown { countdown: 3 };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "game_countdown");

    let event = ServerEvent::PlayerReadyUpdated {
        player_id: "p1".into(),
        is_ready: true,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "player_ready_updated");
    assert_eq!(value["playerId"], "p1");
    assert_eq!(value["isReady"], true);

    let event = ServerEvent::ContractMovePerformed {
        player_id: "p1".into(),
        ability_index: 2,
        damage: 17,
        new_health: 83,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "contract_move_performed");
    assert_eq!(value["abilityIndex"], 2);
    assert_eq!(value["newHealth"], 83);
}

#[test]
fn test_client_request_roundtrip() {
    let request = ClientRequest::PerformAction {
        request_id: "r-9".into(),
        ability_id: 4,
    };
    let encoded = serde_json::to_string(&request).unwrap();
    let decoded: ClientRequest = serde_json::from_str(&encoded).unwrap();
    assert_eq!(request, decoded);
    assert_eq!(decoded.request_id(), "r-9");

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["type"], "perform_action");
    assert_eq!(value["abilityId"], 4);
}

#[test]
fn test_error_response_carries_context() {
    let response = WireResponse::Error {
        request_id: "r-1".into(),
        code: "NOT_YOUR_TURN".into(),
        message: "it is not that player's turn".into(),
        room_code: Some(RoomCode::parse("AAAAAA").unwrap()),
        op: "perform_action".into(),
    };
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["roomCode"], "AAAAAA");
    assert_eq!(value["op"], "perform_action");
}
