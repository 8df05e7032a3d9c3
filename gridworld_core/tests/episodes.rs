use gridworld_core::{
    Direction, Position,
    agent::{Policy, RandomPolicy},
    config::EnvConfig,
    entity::{DoorState, ObjectKind},
    environment::{Action, EnvError, Environment, Objective, Reward, Termination},
    generate::{EmptyRoom, GenerateError, MultiDoorKey, TextMap, UnlockDoorGoal},
    observation::UNSEEN,
    resolve::Event,
};

fn env_from(map: &str) -> Environment {
    env_with(map, EnvConfig::default())
}

fn env_with(map: &str, config: EnvConfig) -> Environment {
    let mut env = Environment::new(config, Box::new(TextMap::new(map))).unwrap();
    env.reset().unwrap();
    env
}

fn positions(env: &Environment) -> Vec<Position> {
    env.agents().iter().map(|a| a.position).collect()
}

#[test]
fn converging_agents_both_stay() {
    let mut env = env_from(
        "
        WE WE WE WE WE
        WE >0 .. <1 WE
        WE WE WE WE WE
        ",
    );
    let outcome = env.step(&[Action::Forward, Action::Forward]).unwrap();
    assert_eq!(outcome.info.applied, vec![false, false]);
    assert_eq!(positions(&env), vec![Position::new(1, 1), Position::new(3, 1)]);
    assert!(outcome.info.events.is_empty());
}

#[test]
fn head_on_swap_is_refused() {
    let mut env = env_from(
        "
        WE WE WE WE
        WE >0 <1 WE
        WE WE WE WE
        ",
    );
    let outcome = env.step(&[Action::Forward, Action::Forward]).unwrap();
    assert_eq!(outcome.info.applied, vec![false, false]);
    assert_eq!(positions(&env), vec![Position::new(1, 1), Position::new(2, 1)]);
}

#[test]
fn queue_advances_together() {
    let mut env = env_from(
        "
        WE WE WE WE WE WE
        WE >0 >1 .. .. WE
        WE WE WE WE WE WE
        ",
    );
    let outcome = env.step(&[Action::Forward, Action::Forward]).unwrap();
    assert_eq!(outcome.info.applied, vec![true, true]);
    assert_eq!(positions(&env), vec![Position::new(2, 1), Position::new(3, 1)]);
}

#[test]
fn movement_ring_stays_put() {
    let mut env = env_from(
        "
        WE WE WE WE
        WE >0 v1 WE
        WE ^3 <2 WE
        WE WE WE WE
        ",
    );
    let before = positions(&env);
    let hash = env.state_hash();
    let outcome = env.step(&[Action::Forward; 4]).unwrap();
    assert_eq!(outcome.info.applied, vec![false; 4]);
    assert_eq!(positions(&env), before);
    assert_eq!(env.state_hash(), hash);
}

#[test]
fn key_opens_matching_door() {
    let mut env = env_from(
        "
        WE WE WE WE WE WE
        WE >0 KR LR GG WE
        WE WE WE WE WE WE
        ",
    );
    // The key blocks the way until it is lifted.
    let blocked = env.step(&[Action::Forward]).unwrap();
    assert_eq!(blocked.info.applied, vec![false]);

    let picked = env.step(&[Action::Pickup]).unwrap();
    assert!(matches!(
        picked.info.events.as_slice(),
        [Event::PickedUp { agent: 0, .. }]
    ));
    assert_eq!(
        env.agents()[0].carrying.as_ref().map(|e| e.object_kind()),
        Some(ObjectKind::Key)
    );

    env.step(&[Action::Forward]).unwrap();
    let toggled = env.step(&[Action::Toggle]).unwrap();
    assert_eq!(toggled.info.applied, vec![true]);
    assert_eq!(
        env.grid()[(3, 1)].as_ref().and_then(|e| e.door_state()),
        Some(DoorState::Open)
    );

    env.step(&[Action::Forward]).unwrap();
    let finish = env.step(&[Action::Forward]).unwrap();
    assert!(finish.done);
    assert_eq!(finish.info.termination, Some(Termination::Objective));
    assert_eq!(finish.info.step_count, 6);
}

#[test]
fn locked_door_needs_a_key() {
    let mut env = env_from(
        "
        WE WE WE WE
        WE >0 LR WE
        WE WE WE WE
        ",
    );
    let outcome = env.step(&[Action::Toggle]).unwrap();
    assert_eq!(outcome.info.applied, vec![false]);
    assert_eq!(
        env.grid()[(2, 1)].as_ref().and_then(|e| e.door_state()),
        Some(DoorState::Locked)
    );
}

#[test]
fn pickup_then_drop_moves_the_ball() {
    let mut env = env_from(
        "
        WE WE WE WE WE
        WE .. >0 AR WE
        WE WE WE WE WE
        ",
    );
    env.step(&[Action::Pickup]).unwrap();
    assert!(env.grid()[(3, 1)].is_none());
    env.step(&[Action::Left]).unwrap();
    env.step(&[Action::Left]).unwrap();
    let dropped = env.step(&[Action::Drop]).unwrap();
    assert_eq!(
        dropped.info.events,
        vec![Event::Dropped {
            agent: 0,
            at: Position::new(1, 1)
        }]
    );
    assert!(env.agents()[0].carrying.is_none());
    assert_eq!(
        env.grid()[(1, 1)].as_ref().map(|e| e.object_kind()),
        Some(ObjectKind::Ball)
    );
}

#[test]
fn same_seed_same_episode() {
    let run = || {
        let config = EnvConfig {
            seed: 99,
            ..EnvConfig::default()
        };
        let mut env = Environment::new(config, Box::new(MultiDoorKey::new(8, 2))).unwrap();
        let mut observations = env.reset().unwrap();
        let mut policies = [RandomPolicy::new(5), RandomPolicy::new(6)];
        let mut hashes = vec![env.state_hash()];
        for _ in 0..30 {
            let actions: Vec<Action> = policies
                .iter_mut()
                .zip(&observations)
                .map(|(policy, obs)| policy.act(obs))
                .collect();
            let outcome = env.step(&actions).unwrap();
            hashes.push(env.state_hash());
            if outcome.done {
                break;
            }
            observations = outcome.observations;
        }
        hashes
    };
    assert_eq!(run(), run());
}

#[test]
fn reseed_replays_layouts() {
    let mut env = Environment::new(EnvConfig::default(), Box::new(EmptyRoom::new(8, 2))).unwrap();
    env.reset().unwrap();
    let first = env.state_hash();
    env.reset().unwrap();
    env.reseed(EnvConfig::default().seed);
    env.reset().unwrap();
    assert_eq!(env.state_hash(), first);
}

#[test]
fn slower_success_earns_less() {
    let map = "
        WE WE WE WE WE
        WE >0 .. GG WE
        WE WE WE WE WE
    ";
    let mut fast = env_from(map);
    fast.step(&[Action::Forward]).unwrap();
    let quick = fast.step(&[Action::Forward]).unwrap();

    let mut slow = env_from(map);
    slow.step(&[Action::Left]).unwrap();
    slow.step(&[Action::Right]).unwrap();
    slow.step(&[Action::Forward]).unwrap();
    let late = slow.step(&[Action::Forward]).unwrap();

    assert!(quick.done && late.done);
    let (quick, late) = (quick.reward.total(), late.reward.total());
    assert!(quick > late);
    assert!(late > 0.0 && quick <= 1.0);
}

#[test]
fn own_goals_pay_per_agent() {
    let map = TextMap {
        objective: Some(Objective::ReachOwnGoals {
            goals: vec![Position::new(2, 1), Position::new(2, 2)],
        }),
        ..TextMap::new(
            "
            WE WE WE WE WE
            WE >0 GR .. WE
            WE >1 GG .. WE
            WE WE WE WE WE
            ",
        )
    };
    let mut env = Environment::new(EnvConfig::default(), Box::new(map)).unwrap();
    env.reset().unwrap();

    let first = env.step(&[Action::Forward, Action::Done]).unwrap();
    assert_eq!(first.reward, Reward::PerAgent(vec![1.0, 0.0]));
    assert!(!first.done);

    let second = env.step(&[Action::Done, Action::Forward]).unwrap();
    assert_eq!(second.reward, Reward::PerAgent(vec![1.0, 1.0]));
    assert!(second.done);
    assert_eq!(second.info.termination, Some(Termination::Objective));
}

#[test]
fn unlock_door_goal_episode_starts() {
    let mut env =
        Environment::new(EnvConfig::default(), Box::new(UnlockDoorGoal::new(2))).unwrap();
    let observations = env.reset().unwrap();
    assert_eq!(observations.len(), 2);
    let outcome = env.step(&[Action::Done, Action::Done]).unwrap();
    assert_eq!(outcome.reward, Reward::PerAgent(vec![0.0, 0.0]));
    assert!(!outcome.done);
}

#[test]
fn mismatched_goal_list_is_rejected() {
    let map = TextMap {
        objective: Some(Objective::ReachOwnGoals { goals: vec![] }),
        ..TextMap::new(">0 ..")
    };
    let mut env = Environment::new(EnvConfig::default(), Box::new(map)).unwrap();
    assert!(matches!(env.reset(), Err(EnvError::InvalidLayout(_))));
}

#[test]
fn lava_ends_without_reward() {
    let mut env = env_from(
        "
        WE WE WE WE WE
        WE >0 VR GG WE
        WE WE WE WE WE
        ",
    );
    let outcome = env.step(&[Action::Forward]).unwrap();
    assert!(outcome.done);
    assert_eq!(outcome.reward, Reward::Shared(0.0));
    assert_eq!(outcome.info.termination, Some(Termination::Lava));
    assert!(matches!(
        env.step(&[Action::Forward]),
        Err(EnvError::EpisodeOver)
    ));
}

#[test]
fn step_limit_cuts_the_episode() {
    let config = EnvConfig {
        max_steps: 3,
        ..EnvConfig::default()
    };
    let mut env = env_with(">0 .. GG", config);
    for _ in 0..2 {
        assert!(!env.step(&[Action::Left]).unwrap().done);
    }
    let last = env.step(&[Action::Left]).unwrap();
    assert!(last.done);
    assert_eq!(last.info.termination, Some(Termination::MaxSteps));
    assert_eq!(last.reward, Reward::Shared(0.0));
    assert!(matches!(
        env.step(&[Action::Left]),
        Err(EnvError::EpisodeOver)
    ));

    // A fresh episode starts the count again.
    env.reset().unwrap();
    assert_eq!(env.step_count(), 0);
    assert!(env.step(&[Action::Left]).is_ok());
}

const SHARING_ROOM: &str = "
    WE WE WE WE WE WE WE WE
    WE .. .. .. .. .. .. WE
    WE <0 .. >1 .. KB .. WE
    WE .. .. .. .. .. .. WE
    WE WE WE WE WE WE WE WE
";

fn sharing_config(comm_radius: f64) -> EnvConfig {
    EnvConfig {
        agent_view_size: 3,
        communication: true,
        comm_radius,
        ..EnvConfig::default()
    }
}

#[test]
fn signalling_fills_in_unseen_cells() {
    let mut env = env_with(SHARING_ROOM, sharing_config(3.0));
    let start = env.observe();
    assert_eq!(start[0].width, 8);
    assert_eq!(start[0].get(5, 2), Some(UNSEEN));
    let key = start[1].get(5, 2).unwrap();
    assert_eq!(key[0], ObjectKind::Key.index());

    let quiet = env.step(&[Action::Done, Action::Done]).unwrap();
    assert_eq!(quiet.observations[0].get(5, 2), Some(UNSEEN));

    let shared = env
        .step_with_signals(&[Action::Done, Action::Done], &[false, true])
        .unwrap();
    assert_eq!(shared.observations[0].get(5, 2), Some(key));
    // Cells the receiver sees itself are left alone.
    assert_eq!(shared.observations[0].get(0, 2), start[0].get(0, 2));
    // The silent agent gives nothing away.
    assert_eq!(shared.observations[1].get(0, 2), Some(UNSEEN));
}

#[test]
fn distant_senders_are_out_of_range() {
    let mut env = env_with(SHARING_ROOM, sharing_config(1.5));
    let outcome = env
        .step_with_signals(&[Action::Done, Action::Done], &[true, true])
        .unwrap();
    assert_eq!(outcome.observations[0].get(5, 2), Some(UNSEEN));
}

#[test]
fn cramped_room_cannot_place_agents() {
    let room = EmptyRoom {
        max_tries: 25,
        ..EmptyRoom::new(3, 1)
    };
    let mut env = Environment::new(EnvConfig::default(), Box::new(room)).unwrap();
    assert!(matches!(
        env.reset(),
        Err(EnvError::Generate(GenerateError::PlacementExhausted { tries: 25, .. }))
    ));
}

#[test]
fn egocentric_window_faces_forward() {
    let mut env = env_from(
        "
        WE WE WE WE WE WE WE WE WE
        WE .. .. .. .. .. .. .. WE
        WE .. .. .. .. .. .. .. WE
        WE .. .. .. .. .. .. .. WE
        WE >0 .. .. .. .. GG .. WE
        WE .. .. .. .. .. .. .. WE
        WE .. .. .. .. .. .. .. WE
        WE .. .. .. .. .. .. .. WE
        WE WE WE WE WE WE WE WE WE
        ",
    );
    let obs = env.step(&[Action::Done]).unwrap().observations;
    let view = &obs[0];
    assert_eq!((view.width, view.height), (7, 7));
    assert_eq!(view.direction, Direction::Right);
    // Five cells straight ahead is one row below the top edge.
    assert_eq!(view.get(3, 0).map(|c| c[0]), Some(ObjectKind::Empty.index()));
    assert_eq!(view.get(3, 1).map(|c| c[0]), Some(ObjectKind::Goal.index()));
    // Three cells to the left, level with the agent.
    assert_eq!(view.get(0, 6).map(|c| c[0]), Some(ObjectKind::Empty.index()));
}

#[test]
fn bundled_maps_start_episodes() {
    for (source, agents) in [
        (include_str!("../../maps/two_rooms.txt"), 2),
        (include_str!("../../maps/crossing.txt"), 4),
    ] {
        let env = env_from(source);
        assert_eq!(env.agents().len(), agents);
        assert!(!env.is_done());
    }
}

const TREASURE_ROOM: &str = "
    WE WE WE WE WE
    WE >0 AR .. WE
    WE >1 AG .. WE
    WE WE WE WE WE
";

fn treasure_hunt(target: Position, by: Option<usize>) -> Environment {
    let map = TextMap {
        objective: Some(Objective::Retrieve { target, by }),
        ..TextMap::new(TREASURE_ROOM)
    };
    let mut env = Environment::new(EnvConfig::default(), Box::new(map)).unwrap();
    env.reset().unwrap();
    env
}

#[test]
fn retrieving_the_target_ends_the_episode() {
    let mut env = treasure_hunt(Position::new(2, 1), None);
    let outcome = env.step(&[Action::Pickup, Action::Done]).unwrap();
    assert!(outcome.done);
    assert_eq!(outcome.info.termination, Some(Termination::Objective));
    let expected = 1.0 - 0.9 * 1.0 / 100.0;
    assert!((outcome.reward.total() - expected).abs() < 1e-6);
    assert!(matches!(outcome.reward, Reward::Shared(_)));
}

#[test]
fn retrieval_by_the_wrong_agent_does_not_count() {
    let mut env = treasure_hunt(Position::new(2, 1), Some(1));
    let outcome = env.step(&[Action::Pickup, Action::Done]).unwrap();
    assert!(!outcome.done);
    assert_eq!(outcome.reward, Reward::Shared(0.0));
    assert_eq!(outcome.info.termination, None);
    assert!(env.agents()[0].carrying.is_some());
}

#[test]
fn retrieval_by_the_designated_agent() {
    let mut env = treasure_hunt(Position::new(2, 2), Some(1));
    // Agent 0 lifting a different ball changes nothing.
    let first = env.step(&[Action::Pickup, Action::Done]).unwrap();
    assert!(!first.done);
    let second = env.step(&[Action::Done, Action::Pickup]).unwrap();
    assert!(second.done);
    assert_eq!(second.info.termination, Some(Termination::Objective));
    assert!(second.reward.total() > 0.0);
}

#[test]
fn lava_voids_own_goal_rewards() {
    let map = TextMap {
        objective: Some(Objective::ReachOwnGoals {
            goals: vec![Position::new(2, 1), Position::new(3, 2)],
        }),
        ..TextMap::new(
            "
            WE WE WE WE WE
            WE >0 GR .. WE
            WE >1 VR GG WE
            WE WE WE WE WE
            ",
        )
    };
    let mut env = Environment::new(EnvConfig::default(), Box::new(map)).unwrap();
    env.reset().unwrap();

    let outcome = env.step(&[Action::Forward, Action::Forward]).unwrap();
    assert!(outcome.done);
    assert_eq!(outcome.info.termination, Some(Termination::Lava));
    assert_eq!(outcome.reward, Reward::PerAgent(vec![0.0, 0.0]));
}

#[test]
fn sharing_sends_the_view_from_before_the_tick() {
    let mut env = env_with(SHARING_ROOM, sharing_config(3.0));
    let key = env.observe()[1].get(5, 2).unwrap();

    // The sender turns away from the key in the tick it signals.
    let outcome = env
        .step_with_signals(&[Action::Done, Action::Left], &[false, true])
        .unwrap();
    assert_eq!(outcome.observations[1].get(5, 2), Some(UNSEEN));
    assert_eq!(outcome.observations[0].get(5, 2), Some(key));
}

#[test]
fn sharing_range_uses_positions_from_before_the_tick() {
    let mut env = env_with(SHARING_ROOM, sharing_config(2.5));
    let key = env.observe()[1].get(5, 2).unwrap();

    // Two cells apart at the start of the tick, three apart after the move.
    let moved = env
        .step_with_signals(&[Action::Done, Action::Forward], &[false, true])
        .unwrap();
    assert_eq!(env.agents()[1].position, Position::new(4, 2));
    assert_eq!(moved.observations[0].get(5, 2), Some(key));
    // The sender now sees column 6, but only last tick's view is shared.
    assert_ne!(moved.observations[1].get(6, 1), Some(UNSEEN));
    assert_eq!(moved.observations[0].get(6, 1), Some(UNSEEN));

    // From the new positions the sender is out of range.
    let apart = env
        .step_with_signals(&[Action::Done, Action::Done], &[false, true])
        .unwrap();
    assert_eq!(apart.observations[0].get(5, 2), Some(UNSEEN));
    assert_eq!(apart.observations[0].get(6, 1), Some(UNSEEN));
}
