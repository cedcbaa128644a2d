use super::types::{Container, State};

fn next_states(src: &State) -> &'static [State] {
    match src {
        State::Reserved => &[State::Reserved, State::Initializing],
        State::Initializing => &[State::Initializing, State::Created],
        State::Created => &[State::Created, State::Completed],
        State::Completed => &[State::Completed],
    }
}

pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    next_states(src).contains(dst)
}

impl State {
    pub fn can_transition_to(&self, next: State) -> bool {
        valid_state_transition(self, &next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed)
    }
}

impl Container {
    /// Moves to `next` if that is a legal transition; returns whether it moved.
    pub fn advance(&mut self, next: State) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(valid_state_transition(&State::Reserved, &State::Initializing));
        assert!(valid_state_transition(&State::Initializing, &State::Created));
        assert!(valid_state_transition(&State::Created, &State::Completed));
        assert!(State::Created.can_transition_to(State::Created));
    }

    #[test]
    fn test_no_regression_or_skipping() {
        assert!(!valid_state_transition(&State::Created, &State::Reserved));
        assert!(!valid_state_transition(&State::Completed, &State::Created));
        assert!(!valid_state_transition(&State::Reserved, &State::Created));
        assert!(State::Completed.is_terminal());
        assert!(!State::Initializing.is_terminal());
    }

    #[test]
    fn test_container_advance() {
        let mut container = Container::default();
        assert!(container.advance(State::Initializing));
        assert!(!container.advance(State::Completed));
        assert_eq!(container.state, State::Initializing);
        assert!(container.advance(State::Created));
        assert!(!container.advance(State::Reserved));
        assert_eq!(container.state, State::Created);
    }
}
