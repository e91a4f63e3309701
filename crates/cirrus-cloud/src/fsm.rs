//! Lifecycle state machines
//!
//! A [`StateMachine`] is a pure transition table. [`Stateful`] binds a
//! stored record to its machine so the store can apply a transition as a
//! compare-and-swap: the row is only updated when its persisted state still
//! equals the state the caller observed.

use crate::error::{CloudError, Result};
use crate::model::{
    AllocationEvent, AllocationState, Controller, ControllerEvent, ControllerState,
    SubnetAllocation, VirtualMachine, VmEvent, VmState,
};
use crate::store::{Record, Store, Transaction};
use chrono::Utc;
use std::fmt;

pub trait StateMachine {
    type State: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Event: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// The state reached by applying `event` in `state`, if legal
    fn next_state(state: Self::State, event: Self::Event) -> Option<Self::State>;

    fn transition(state: Self::State, event: Self::Event) -> Result<Self::State> {
        Self::next_state(state, event).ok_or_else(|| CloudError::IllegalTransition {
            state: state.to_string(),
            event: event.to_string(),
        })
    }
}

/// A record whose state is driven by a [`StateMachine`]
pub trait Stateful: Record {
    type Machine: StateMachine;

    fn state(&self) -> <Self::Machine as StateMachine>::State;

    fn set_state(&mut self, state: <Self::Machine as StateMachine>::State);
}

/// Automation controller lifecycle
pub struct ControllerLifecycle;

impl StateMachine for ControllerLifecycle {
    type State = ControllerState;
    type Event = ControllerEvent;

    fn next_state(state: ControllerState, event: ControllerEvent) -> Option<ControllerState> {
        use ControllerEvent::*;
        use ControllerState::*;

        match (state, event) {
            (Running | Stopped | Alert | Error, DestroyRequested) => Some(Destroying),
            // a destroy that failed before reaching Error may be re-driven
            (Destroying, DestroyRequested) => Some(Destroying),
            (Destroying, OperationSucceeded) => Some(Destroyed),
            (Destroying, OperationFailed) => Some(Error),
            _ => None,
        }
    }
}

impl Stateful for Controller {
    type Machine = ControllerLifecycle;

    fn state(&self) -> ControllerState {
        self.state
    }

    fn set_state(&mut self, state: ControllerState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Guest subnet allocation lifecycle
pub struct AllocationLifecycle;

impl StateMachine for AllocationLifecycle {
    type State = AllocationState;
    type Event = AllocationEvent;

    fn next_state(state: AllocationState, event: AllocationEvent) -> Option<AllocationState> {
        match (state, event) {
            (AllocationState::Free, AllocationEvent::Assign) => Some(AllocationState::Allocated),
            (AllocationState::Allocated, AllocationEvent::Release) => Some(AllocationState::Free),
            _ => None,
        }
    }
}

impl Stateful for SubnetAllocation {
    type Machine = AllocationLifecycle;

    fn state(&self) -> AllocationState {
        self.state
    }

    fn set_state(&mut self, state: AllocationState) {
        self.state = state;
    }
}

/// Virtual machine teardown lifecycle
pub struct VmLifecycle;

impl StateMachine for VmLifecycle {
    type State = VmState;
    type Event = VmEvent;

    fn next_state(state: VmState, event: VmEvent) -> Option<VmState> {
        match (state, event) {
            (VmState::Running, VmEvent::Stop) => Some(VmState::Stopped),
            (VmState::Running | VmState::Stopped, VmEvent::Destroy) => Some(VmState::Destroyed),
            (VmState::Destroyed, VmEvent::Expunge) => Some(VmState::Expunging),
            _ => None,
        }
    }
}

impl Stateful for VirtualMachine {
    type Machine = VmLifecycle;

    fn state(&self) -> VmState {
        self.state
    }

    fn set_state(&mut self, state: VmState) {
        self.state = state;
    }
}

type StateOf<T> = <<T as Stateful>::Machine as StateMachine>::State;
type EventOf<T> = <<T as Stateful>::Machine as StateMachine>::Event;

impl Transaction {
    /// Set the state of row `id` to `next` if it is still `expected`
    pub fn compare_and_swap_state<T: Stateful>(
        &mut self,
        id: u64,
        expected: StateOf<T>,
        next: StateOf<T>,
    ) -> Result<T> {
        let mut record = self.get::<T>(id)?.clone();
        let actual = record.state();
        if actual != expected {
            return Err(CloudError::ConcurrentModification {
                kind: T::KIND,
                id,
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        record.set_state(next);
        self.update(&record);
        Ok(record)
    }

    /// Validate `event` against the machine table and apply it atomically
    pub fn transition<T: Stateful>(
        &mut self,
        id: u64,
        current: StateOf<T>,
        event: EventOf<T>,
    ) -> Result<T> {
        let next = T::Machine::transition(current, event)?;
        let record = self.compare_and_swap_state::<T>(id, current, next)?;
        tracing::debug!(
            kind = T::KIND,
            id,
            from = %current,
            to = %next,
            event = %event,
            "State transition"
        );
        Ok(record)
    }
}

impl Store {
    pub async fn compare_and_swap_state<T: Stateful>(
        &self,
        id: u64,
        expected: StateOf<T>,
        next: StateOf<T>,
    ) -> Result<T> {
        self.transaction(|tx| tx.compare_and_swap_state::<T>(id, expected, next))
            .await
    }

    /// Apply `event` to row `id`, which the caller last saw in `current`
    pub async fn transition<T: Stateful>(
        &self,
        id: u64,
        current: StateOf<T>,
        event: EventOf<T>,
    ) -> Result<T> {
        self.transaction(|tx| tx.transition::<T>(id, current, event))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Controller;

    #[test]
    fn test_destroy_is_allowed_from_every_live_state() {
        for state in [
            ControllerState::Running,
            ControllerState::Stopped,
            ControllerState::Alert,
            ControllerState::Error,
            ControllerState::Destroying,
        ] {
            assert_eq!(
                ControllerLifecycle::next_state(state, ControllerEvent::DestroyRequested),
                Some(ControllerState::Destroying),
                "destroy from {}",
                state
            );
        }
    }

    #[test]
    fn test_events_outside_the_table_are_illegal() {
        let err = ControllerLifecycle::transition(
            ControllerState::Running,
            ControllerEvent::OperationSucceeded,
        )
        .unwrap_err();
        match err {
            CloudError::IllegalTransition { state, event } => {
                assert_eq!(state, "running");
                assert_eq!(event, "operation_succeeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(
            ControllerLifecycle::next_state(
                ControllerState::Destroyed,
                ControllerEvent::DestroyRequested
            )
            .is_none()
        );
        assert!(
            ControllerLifecycle::next_state(ControllerState::Stopped, ControllerEvent::StartRequested)
                .is_none()
        );
    }

    #[test]
    fn test_allocation_table() {
        assert_eq!(
            AllocationLifecycle::next_state(AllocationState::Free, AllocationEvent::Assign),
            Some(AllocationState::Allocated)
        );
        assert!(
            AllocationLifecycle::transition(AllocationState::Allocated, AllocationEvent::Assign)
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_transition_applies_and_persists() {
        let store = Store::in_memory();
        let controller = store.persist(Controller::new("c1", 1, 1)).await.unwrap();

        let updated = store
            .transition::<Controller>(
                controller.id,
                ControllerState::Running,
                ControllerEvent::DestroyRequested,
            )
            .await
            .unwrap();
        assert_eq!(updated.state, ControllerState::Destroying);

        let stored = store.get::<Controller>(controller.id).await.unwrap();
        assert_eq!(stored.state, ControllerState::Destroying);
    }

    #[tokio::test]
    async fn test_stale_state_is_a_concurrent_modification() {
        let store = Store::in_memory();
        let controller = store
            .persist(Controller::new("c1", 1, 1).with_state(ControllerState::Stopped))
            .await
            .unwrap();

        let err = store
            .transition::<Controller>(
                controller.id,
                ControllerState::Running,
                ControllerEvent::DestroyRequested,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::ConcurrentModification { .. }));

        let stored = store.get::<Controller>(controller.id).await.unwrap();
        assert_eq!(stored.state, ControllerState::Stopped);
    }
}
