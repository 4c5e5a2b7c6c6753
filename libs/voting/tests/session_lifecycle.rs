use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use voting::{
    CommandReply, CreateSessionRequest, HostCommand, MemoryStore, RestaurantDetails, Round,
    Session, SessionEngine, SessionEvent, SessionStatus, TopKPolicy, VoteType, VotingConfig,
    VotingError, send_host_command,
};

fn pool(size: usize) -> Vec<RestaurantDetails> {
    (0..size)
        .map(|i| RestaurantDetails::named(format!("r{}", i), format!("Restaurant {}", i)))
        .collect()
}

fn config_with_k(k: u32) -> VotingConfig {
    VotingConfig {
        top_k: TopKPolicy::Fixed { k },
        ..VotingConfig::default()
    }
}

/// Session with pool size 5, one-minute rounds and two likes, joined by bob and carol
async fn open_session(config: VotingConfig) -> (SessionEngine, MemoryStore, Session) {
    let store = MemoryStore::new();
    let engine = SessionEngine::new(Arc::new(store.clone()), config);

    let session = engine
        .create_session(
            "host",
            CreateSessionRequest {
                pool_size: Some(5),
                round_minutes: Some(1),
                likes_per_user: Some(2),
                restaurants: pool(5),
            },
        )
        .await
        .unwrap();

    for user in ["bob", "carol"] {
        engine.join_session(&session.join_code, user).await.unwrap();
    }

    (engine, store, session)
}

async fn like(engine: &SessionEngine, session_id: i64, user: &str, provider: &str, round: Round) {
    engine
        .cast_vote(session_id, user, provider, round, VoteType::Like)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_round_session_end_to_end() {
    let (engine, _store, session) = open_session(config_with_k(2)).await;
    let id = session.id;
    let mut events = engine.subscribe(id, "carol").await.unwrap();

    engine.start_session(id, "host").await.unwrap();

    // r1, r2 and r3 all end round one with two likes
    like(&engine, id, "host", "r1", Round::One).await;
    like(&engine, id, "host", "r2", Round::One).await;
    like(&engine, id, "bob", "r3", Round::One).await;
    like(&engine, id, "bob", "r2", Round::One).await;
    like(&engine, id, "carol", "r1", Round::One).await;
    like(&engine, id, "carol", "r3", Round::One).await;

    let status = engine.voting_status(id, "host").await.unwrap();
    assert!(status.all_votes_in);

    engine.complete_round1(id, "host").await.unwrap();

    let finalists: Vec<_> = engine
        .current_restaurants(id, "bob")
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.details.provider_id, c.like_count))
        .collect();
    assert_eq!(
        finalists,
        vec![("r1".to_string(), 0), ("r2".to_string(), 0)]
    );

    like(&engine, id, "host", "r2", Round::Two).await;
    like(&engine, id, "bob", "r2", Round::Two).await;
    like(&engine, id, "carol", "r1", Round::Two).await;

    // round two ends on its timer
    let mut transitions = Vec::new();
    let mut outcome = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::RoundTransition { top_k, .. } => transitions.push(top_k),
            SessionEvent::SessionComplete {
                winner,
                final_rankings,
                total_participants,
                total_votes,
                ..
            } => {
                outcome = Some((winner, final_rankings, total_participants, total_votes));
            }
            _ => {}
        }
    }

    assert_eq!(transitions.len(), 1);
    let top_k: Vec<_> = transitions[0].iter().map(|r| r.provider_id.as_str()).collect();
    assert_eq!(top_k, vec!["r1", "r2"]);

    let (winner, rankings, participants, votes) = outcome.expect("session completed");
    let winner = winner.expect("a winner");
    assert_eq!(winner.provider_id, "r2");
    assert_eq!(winner.round1_votes, 2);
    assert_eq!(winner.round2_votes, 2);
    assert_eq!(rankings.len(), 2);
    assert_eq!(rankings[1].provider_id, "r1");
    assert_eq!(rankings[1].round2_votes, 1);
    assert_eq!(participants, 3);
    assert_eq!(votes, 9);

    let view = engine.session_view(id, "host").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Complete);
    assert!(view.is_host);
}

#[tokio::test]
async fn test_all_votes_in_only_when_every_cap_is_used() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();

    like(&engine, id, "host", "r0", Round::One).await;
    like(&engine, id, "host", "r1", Round::One).await;
    like(&engine, id, "bob", "r0", Round::One).await;
    like(&engine, id, "bob", "r4", Round::One).await;
    like(&engine, id, "carol", "r2", Round::One).await;

    let status = engine.voting_status(id, "carol").await.unwrap();
    assert!(!status.all_votes_in);
    assert_eq!(status.total_participants, 3);
    assert_eq!(status.participants_with_no_votes_left, 2);
    assert_eq!(status.total_votes_cast, 5);
    assert_eq!(status.total_possible_votes, 6);
    assert_eq!(status.current_round, Round::One);

    // a dislike does not use up a like
    engine
        .cast_vote(id, "carol", "r3", Round::One, VoteType::Dislike)
        .await
        .unwrap();
    assert!(!engine.voting_status(id, "host").await.unwrap().all_votes_in);

    like(&engine, id, "carol", "r4", Round::One).await;

    let status = engine.voting_status(id, "host").await.unwrap();
    assert!(status.all_votes_in);
    assert_eq!(status.total_votes_cast, 6);
    assert_eq!(engine.remaining_votes(id, "carol").await.unwrap(), 0);
}

#[tokio::test]
async fn test_round_one_vote_rejected_after_round_two_begins() {
    let (engine, store, session) = open_session(config_with_k(2)).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();
    like(&engine, id, "bob", "r0", Round::One).await;
    engine.complete_round1(id, "host").await.unwrap();

    let late = engine
        .cast_vote(id, "carol", "r0", Round::One, VoteType::Like)
        .await;
    assert!(matches!(
        late,
        Err(VotingError::InvalidRound {
            submitted: Round::One,
            current: Round::Two,
            ..
        })
    ));
    assert_eq!(store.vote_count().await, 1);
}

#[tokio::test]
async fn test_round_two_allows_a_single_like() {
    let (engine, _store, session) = open_session(config_with_k(3)).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();
    engine.complete_round1(id, "host").await.unwrap();

    assert_eq!(engine.remaining_votes(id, "bob").await.unwrap(), 1);
    like(&engine, id, "bob", "r0", Round::Two).await;

    let second = engine
        .cast_vote(id, "bob", "r1", Round::Two, VoteType::Like)
        .await;
    assert!(matches!(
        second,
        Err(VotingError::CapExceeded {
            cap: 1,
            round: Round::Two
        })
    ));
}

#[tokio::test]
async fn test_complete_round1_twice_broadcasts_once() {
    let (engine, _store, session) = open_session(config_with_k(2)).await;
    let id = session.id;
    let mut events = engine.subscribe(id, "bob").await.unwrap();

    engine.start_session(id, "host").await.unwrap();

    let first = send_host_command(&engine, id, "host", HostCommand::CompleteRound1)
        .await
        .unwrap();
    assert_eq!(
        first,
        CommandReply::Applied {
            status: SessionStatus::Round2
        }
    );

    let second = send_host_command(&engine, id, "host", HostCommand::CompleteRound1)
        .await
        .unwrap();
    assert!(matches!(second, CommandReply::Ignored { .. }));

    let repeated_start = engine.start_session(id, "host").await;
    assert!(matches!(
        repeated_start,
        Err(VotingError::AlreadyTransitioned { .. })
    ));

    let mut transitions = 0;
    while let Some(event) = events.try_recv() {
        if let SessionEvent::RoundTransition { .. } = event {
            transitions += 1;
        }
    }
    assert_eq!(transitions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_votes_record_once() {
    let (engine, store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .cast_vote(id, "bob", "r2", Round::One, VoteType::Like)
                .await
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(VotingError::DuplicateVote { .. }) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(store.vote_count().await, 1);

    let restaurants = engine.current_restaurants(id, "bob").await.unwrap();
    let r2 = restaurants
        .iter()
        .find(|c| c.provider_id() == "r2")
        .unwrap();
    assert_eq!(r2.like_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_likes_never_exceed_cap() {
    let (engine, store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..5 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .cast_vote(id, "bob", &format!("r{}", i), Round::One, VoteType::Like)
                .await
        }));
    }

    let mut accepted = 0;
    let mut over_cap = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(VotingError::CapExceeded { .. }) => over_cap += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(accepted, 2);
    assert_eq!(over_cap, 3);
    assert_eq!(store.vote_count().await, 2);
    assert_eq!(engine.remaining_votes(id, "bob").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_round_timer_advances_session() {
    let (engine, _store, session) = open_session(config_with_k(2)).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();
    like(&engine, id, "carol", "r4", Round::One).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let view = engine.session_view(id, "bob").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Round1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let view = engine.session_view(id, "bob").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Round2);
    assert_eq!(view.session.round, Round::Two);

    let finalists = engine.current_restaurants(id, "bob").await.unwrap();
    assert_eq!(finalists.len(), 2);
    assert_eq!(finalists[0].provider_id(), "r0");
    assert_eq!(finalists[1].provider_id(), "r4");

    // a late host command is a no-op
    let reply = send_host_command(&engine, id, "host", HostCommand::CompleteRound1)
        .await
        .unwrap();
    assert!(matches!(reply, CommandReply::Ignored { .. }));

    tokio::time::sleep(Duration::from_secs(61)).await;
    let view = engine.session_view(id, "bob").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Complete);
}

#[tokio::test]
async fn test_only_host_controls_session() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;

    let start = engine.start_session(id, "bob").await;
    assert!(matches!(start, Err(VotingError::NotHost { .. })));

    let command = send_host_command(&engine, id, "carol", HostCommand::End).await;
    assert!(matches!(command, Err(VotingError::NotHost { .. })));

    let view = engine.session_view(id, "bob").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Open);
    assert!(!view.is_host);

    // any participant may ask for its own round status
    let reply = send_host_command(&engine, id, "bob", HostCommand::GetRoundStatus)
        .await
        .unwrap();
    match reply {
        CommandReply::Direct {
            event:
                SessionEvent::RoundStatus {
                    current_round,
                    likes_per_user,
                    remaining_likes,
                    ..
                },
        } => {
            assert_eq!(current_round, Round::One);
            assert_eq!(likes_per_user, 2);
            assert_eq!(remaining_likes, 2);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_votes_before_start_are_rejected() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;

    let early = engine
        .cast_vote(session.id, "bob", "r0", Round::One, VoteType::Like)
        .await;
    assert!(matches!(early, Err(VotingError::VotingNotStarted(_))));

    let stranger = engine.voting_status(session.id, "mallory").await;
    assert!(matches!(stranger, Err(VotingError::NotParticipant { .. })));
}

#[tokio::test]
async fn test_stale_session_expires() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;
    let mut events = engine.subscribe(id, "bob").await.unwrap();

    let now = Utc::now();
    assert!(engine.expire_stale(now).await.unwrap().is_empty());

    let expired = engine
        .expire_stale(now + ChronoDuration::minutes(31))
        .await
        .unwrap();
    assert_eq!(expired, vec![id]);

    match events.recv().await {
        Some(SessionEvent::SessionExpired { reason, .. }) => assert_eq!(reason, "inactive"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.recv().await.is_none());

    let join = engine.join_session(&session.join_code, "dave").await;
    assert!(matches!(join, Err(VotingError::JoinCodeNotFound(_))));

    assert!(!engine.expire_session(id, "again").await.unwrap());
    let view = engine.session_view(id, "bob").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Expired);

    let snapshot = engine.status_snapshot(id, "bob").await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Expired);
    assert_eq!(snapshot.last_updated, now + ChronoDuration::minutes(31));
}

#[tokio::test]
async fn test_running_round_is_never_expired() {
    let config = VotingConfig {
        max_duration_minutes: 2,
        inactive_timeout_minutes: 2,
        ..VotingConfig::default()
    };
    let engine = SessionEngine::new(Arc::new(MemoryStore::new()), config);
    let session = engine
        .create_session(
            "host",
            CreateSessionRequest {
                pool_size: Some(3),
                round_minutes: Some(10),
                likes_per_user: Some(1),
                restaurants: pool(3),
            },
        )
        .await
        .unwrap();
    let id = session.id;

    engine.start_session(id, "host").await.unwrap();
    engine.complete_round1(id, "host").await.unwrap();
    let round_two_started = Utc::now();

    // Older than the maximum duration and idle, but round two is still running
    let expired = engine
        .expire_stale(round_two_started + ChronoDuration::minutes(9))
        .await
        .unwrap();
    assert!(expired.is_empty());
    let view = engine.session_view(id, "host").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Round2);

    // Once the round deadline has passed without the timer advancing it
    let expired = engine
        .expire_stale(round_two_started + ChronoDuration::minutes(11))
        .await
        .unwrap();
    assert_eq!(expired, vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_ending_session_cancels_round_timer() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;
    engine.start_session(id, "host").await.unwrap();

    let ended = engine.end_session(id, "host").await.unwrap();
    assert_eq!(ended.status, SessionStatus::Expired);

    tokio::time::sleep(Duration::from_secs(180)).await;
    let view = engine.session_view(id, "host").await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Expired);
    assert_eq!(engine.broadcaster().subscriber_count(id), 0);

    let vote = engine
        .cast_vote(id, "bob", "r0", Round::One, VoteType::Like)
        .await;
    assert!(matches!(vote, Err(VotingError::SessionClosed { .. })));
}

#[tokio::test]
async fn test_join_is_idempotent_and_case_insensitive() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let code = format!(" {} ", session.join_code.to_lowercase());

    let first = assert_ok!(engine.join_session(&code, "dave").await);
    assert!(first.newly_joined);
    assert!(!first.participant.is_host);

    let again = assert_ok!(engine.join_session(&code, "dave").await);
    assert!(!again.newly_joined);

    let participants = engine.participants(session.id, "dave").await.unwrap();
    let users: Vec<_> = participants.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(users, vec!["host", "bob", "carol", "dave"]);
    assert_eq!(participants.iter().filter(|p| p.is_host).count(), 1);

    let missing = engine.join_session("ZZZZZZ", "erin").await;
    assert!(matches!(missing, Err(VotingError::JoinCodeNotFound(_))));
    let malformed = engine.join_session("no!", "erin").await;
    assert!(matches!(malformed, Err(VotingError::InvalidJoinCode(_))));
}

#[tokio::test]
async fn test_create_session_validates_and_seeds_pool() {
    let engine = SessionEngine::new(Arc::new(MemoryStore::new()), VotingConfig::default());

    let too_long = engine
        .create_session(
            "host",
            CreateSessionRequest {
                round_minutes: Some(31),
                restaurants: pool(3),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(too_long, Err(VotingError::InvalidConfig(_))));

    let empty = engine
        .create_session("host", CreateSessionRequest::default())
        .await;
    assert!(matches!(empty, Err(VotingError::InvalidConfig(_))));

    let mut restaurants = pool(7);
    restaurants.insert(1, RestaurantDetails::named("r0", "Duplicate"));
    let session = engine
        .create_session(
            "host",
            CreateSessionRequest {
                pool_size: Some(5),
                restaurants,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Open);
    assert_eq!(session.round_minutes, 5);
    assert_eq!(session.likes_per_user, 3);
    assert_eq!(session.join_code.len(), 6);

    let candidates = engine.current_restaurants(session.id, "host").await.unwrap();
    let ids: Vec<_> = candidates.iter().map(|c| c.provider_id()).collect();
    assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
    assert_eq!(candidates[0].details.name, "Restaurant 0");
}

#[tokio::test]
async fn test_status_snapshot_tracks_activity() {
    let (engine, _store, session) = open_session(VotingConfig::default()).await;
    let id = session.id;

    let before = engine.status_snapshot(id, "bob").await.unwrap();
    assert_eq!(before.status, SessionStatus::Open);
    assert_eq!(before.millis_left, None);

    engine.start_session(id, "host").await.unwrap();
    like(&engine, id, "bob", "r1", Round::One).await;

    let after = engine.status_snapshot(id, "bob").await.unwrap();
    assert_eq!(after.status, SessionStatus::Round1);
    assert_eq!(after.remaining_votes, 1);
    assert_eq!(after.voting.total_votes_cast, 1);
    assert!(after.millis_left.is_some_and(|left| left <= 60_000));
    assert!(after.last_updated >= before.last_updated);
}
