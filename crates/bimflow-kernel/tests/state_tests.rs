use bimflow_kernel::state_machine::{allowed_transitions, validate_transition};
use bimflow_kernel::{SessionState, StateMachineError};
use proptest::prelude::*;

#[test]
fn test_happy_path_is_legal() {
    use SessionState::*;
    let path = [
        Disconnected,
        Launching,
        AwaitingReady,
        Connected,
        Driving,
        Connected,
        Driving,
        Connected,
        Closing,
        Disconnected,
    ];
    for pair in path.windows(2) {
        assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
    }
}

#[test]
fn test_every_live_state_can_close() {
    use SessionState::*;
    for from in [Launching, AwaitingReady, Connected, Driving] {
        assert!(validate_transition(from, Closing).is_ok());
    }
    // Nothing to close when already disconnected
    assert!(validate_transition(Disconnected, Closing).is_err());
}

#[test]
fn test_cannot_drive_before_connecting() {
    assert_eq!(
        validate_transition(SessionState::AwaitingReady, SessionState::Driving),
        Err(StateMachineError::IllegalTransition {
            from: SessionState::AwaitingReady,
            to: SessionState::Driving,
        })
    );
    assert!(validate_transition(SessionState::Launching, SessionState::Connected).is_err());
}

fn any_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Disconnected),
        Just(SessionState::Launching),
        Just(SessionState::AwaitingReady),
        Just(SessionState::Connected),
        Just(SessionState::Driving),
        Just(SessionState::Closing),
    ]
}

proptest! {
    #[test]
    fn prop_validate_agrees_with_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);
        prop_assert_eq!(res.is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_closing_always_reaches_disconnected(from in any_state()) {
        if from != SessionState::Disconnected && from != SessionState::Closing {
            prop_assert!(validate_transition(from, SessionState::Closing).is_ok());
        }
        prop_assert!(validate_transition(SessionState::Closing, SessionState::Disconnected).is_ok());
    }
}
