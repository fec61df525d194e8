// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Finite state machines
//!
//! [`Fsm`] is an actor driven by a table of state functions. Each state
//! name owns one or more functions; a message is offered to them in
//! registration order and the first one returning a [`State`] wins. When
//! none of them matches, the unhandled function runs (log and stay by
//! default).
//!
//! ```ignore
//! let props = FsmBuilder::start_with(Light::Red, 0u32)
//!     .when(Light::Red, None, |_fsm, event, _ctx| {
//!         event.message().is::<Next>().then(|| event.goto(Light::Green))
//!     })
//!     .when(Light::Green, Some(Duration::from_secs(1)), |_fsm, event, _ctx| {
//!         event.message().is::<StateTimeout>().then(|| event.goto(Light::Red))
//!     })
//!     .props();
//! ```
//!

use crate::{
    Actor, ActorContext, ActorRef, AnyMessage, Error, Message, Props,
    message::Terminated, scheduler::Cancelable,
};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

/// Bounds of a state name.
pub trait StateName: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> StateName for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds of the data carried between states.
pub trait StateData: Clone + Send + Sync + 'static {}

impl<T> StateData for T where T: Clone + Send + Sync + 'static {}

/// Delivered to the state function when the state timeout elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateTimeout;

impl Message for StateTimeout {}

/// Registers the sender as a transition listener. It first receives a
/// [`CurrentState`] and then a [`Transition`] for every state change.
#[derive(Clone, Debug)]
pub struct SubscribeTransitionCallBack(pub ActorRef);

impl Message for SubscribeTransitionCallBack {}

#[derive(Clone, Debug)]
pub struct UnsubscribeTransitionCallBack(pub ActorRef);

impl Message for UnsubscribeTransitionCallBack {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentState<S> {
    pub actor: ActorRef,
    pub state: S,
}

impl<S: StateName> Message for CurrentState<S> {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition<S> {
    pub actor: ActorRef,
    pub from: S,
    pub to: S,
}

impl<S: StateName> Message for Transition<S> {}

/// Why the machine stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    Normal,
    Shutdown,
    Failure(String),
}

/// Argument of the termination hook.
#[derive(Clone, Debug)]
pub struct StopEvent<S, D> {
    pub reason: Reason,
    pub state: S,
    pub data: D,
}

#[derive(Clone, Debug)]
struct TimeoutMarker {
    generation: u64,
}

impl Message for TimeoutMarker {}

#[derive(Clone, Debug)]
struct TimerFired {
    name: String,
    generation: u64,
    payload: AnyMessage,
}

impl Message for TimerFired {}

/// Message offered to a state function together with the current state.
pub struct Event<S, D> {
    message: AnyMessage,
    state: S,
    data: D,
}

impl<S: StateName, D: StateData> Event<S, D> {
    pub fn message(&self) -> &AnyMessage {
        &self.message
    }

    pub fn state_name(&self) -> &S {
        &self.state
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    /// Remains in the current state without notifying listeners.
    pub fn stay(&self) -> State<S, D> {
        State::new(self.state.clone(), self.data.clone()).without_notification()
    }

    /// Moves to `state`. Going to the current state again counts as a
    /// transition.
    pub fn goto(&self, state: S) -> State<S, D> {
        State::new(state, self.data.clone())
    }

    pub fn stop(&self) -> State<S, D> {
        self.stop_for(Reason::Normal)
    }

    pub fn stop_for(&self, reason: Reason) -> State<S, D> {
        let mut state = self.stay();
        state.stop_reason = Some(reason);
        state
    }
}

/// Outcome of a state function.
#[derive(Debug)]
pub struct State<S, D> {
    name: S,
    data: D,
    timeout: Option<Duration>,
    stop_reason: Option<Reason>,
    replies: Vec<AnyMessage>,
    notifies: bool,
}

impl<S: StateName, D: StateData> State<S, D> {
    pub fn new(name: S, data: D) -> Self {
        Self {
            name,
            data,
            timeout: None,
            stop_reason: None,
            replies: Vec::new(),
            notifies: true,
        }
    }

    pub fn name(&self) -> &S {
        &self.name
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    /// Replaces the data carried into the next state.
    pub fn using(mut self, data: D) -> Self {
        self.data = data;
        self
    }

    /// State timeout for this transition, overriding the one registered
    /// for the target state.
    pub fn for_max(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Queues a reply to the sender of the current message. Replies are
    /// sent in the order they were queued.
    pub fn replying<M: Message>(mut self, reply: M) -> Self {
        self.replies.push(AnyMessage::new(reply));
        self
    }

    fn without_notification(mut self) -> Self {
        self.notifies = false;
        self
    }
}

type StateFunction<S, D> = Arc<
    dyn Fn(&mut Fsm<S, D>, &Event<S, D>, &mut ActorContext<Fsm<S, D>>) -> Option<State<S, D>>
        + Send
        + Sync,
>;

type TransitionHandler<S, D> =
    Arc<dyn Fn(&S, &S, &mut ActorContext<Fsm<S, D>>) + Send + Sync>;

type TerminationHandler<S, D> = Arc<dyn Fn(&StopEvent<S, D>) + Send + Sync>;

struct FsmDefinition<S: StateName, D: StateData> {
    start_state: S,
    start_data: D,
    functions: HashMap<S, Vec<StateFunction<S, D>>>,
    timeouts: HashMap<S, Duration>,
    unhandled: Option<StateFunction<S, D>>,
    transitions: Vec<TransitionHandler<S, D>>,
    termination: Option<TerminationHandler<S, D>>,
}

/// Builds the definition shared by every incarnation of an [`Fsm`].
pub struct FsmBuilder<S: StateName, D: StateData> {
    definition: FsmDefinition<S, D>,
}

impl<S: StateName, D: StateData> FsmBuilder<S, D> {
    /// Initial state and data of every incarnation.
    pub fn start_with(state: S, data: D) -> Self {
        Self {
            definition: FsmDefinition {
                start_state: state,
                start_data: data,
                functions: HashMap::new(),
                timeouts: HashMap::new(),
                unhandled: None,
                transitions: Vec::new(),
                termination: None,
            },
        }
    }

    /// Registers a state function for `state`. Functions registered
    /// earlier for the same state are tried first. A `timeout` replaces
    /// the one registered before.
    pub fn when<F>(mut self, state: S, timeout: Option<Duration>, function: F) -> Self
    where
        F: Fn(
                &mut Fsm<S, D>,
                &Event<S, D>,
                &mut ActorContext<Fsm<S, D>>,
            ) -> Option<State<S, D>>
            + Send
            + Sync
            + 'static,
    {
        if let Some(timeout) = timeout {
            self.definition.timeouts.insert(state.clone(), timeout);
        }
        self.definition
            .functions
            .entry(state)
            .or_default()
            .push(Arc::new(function));
        self
    }

    /// Function run when no state function matched.
    pub fn when_unhandled<F>(mut self, function: F) -> Self
    where
        F: Fn(
                &mut Fsm<S, D>,
                &Event<S, D>,
                &mut ActorContext<Fsm<S, D>>,
            ) -> Option<State<S, D>>
            + Send
            + Sync
            + 'static,
    {
        self.definition.unhandled = Some(Arc::new(function));
        self
    }

    pub fn on_transition<F>(mut self, handler: F) -> Self
    where
        F: Fn(&S, &S, &mut ActorContext<Fsm<S, D>>) + Send + Sync + 'static,
    {
        self.definition.transitions.push(Arc::new(handler));
        self
    }

    /// Hook run once when the machine stops.
    pub fn on_termination<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StopEvent<S, D>) + Send + Sync + 'static,
    {
        self.definition.termination = Some(Arc::new(handler));
        self
    }

    pub fn props(self) -> Props<Fsm<S, D>> {
        let definition = Arc::new(self.definition);
        Props::new(move || Fsm::new(definition.clone()))
    }
}

struct Timer {
    generation: u64,
    repeat: bool,
    handle: Cancelable,
}

/// Actor running a state machine built with [`FsmBuilder`].
pub struct Fsm<S: StateName, D: StateData> {
    definition: Arc<FsmDefinition<S, D>>,
    state: S,
    data: D,
    listeners: HashSet<ActorRef>,
    state_timeout: Option<Cancelable>,
    timeout_generation: u64,
    timers: HashMap<String, Timer>,
    timer_generation: u64,
    terminated: bool,
}

impl<S: StateName, D: StateData> Fsm<S, D> {
    fn new(definition: Arc<FsmDefinition<S, D>>) -> Self {
        Self {
            state: definition.start_state.clone(),
            data: definition.start_data.clone(),
            definition,
            listeners: HashSet::new(),
            state_timeout: None,
            timeout_generation: 0,
            timers: HashMap::new(),
            timer_generation: 0,
            terminated: false,
        }
    }

    pub fn state_name(&self) -> &S {
        &self.state
    }

    pub fn state_data(&self) -> &D {
        &self.data
    }

    /// Starts the timer `name`, replacing a timer with the same name.
    /// `message` is offered to the state function when it fires.
    pub fn start_timer<M: Message>(
        &mut self,
        name: &str,
        message: M,
        delay: Duration,
        repeat: bool,
        ctx: &ActorContext<Self>,
    ) {
        self.cancel_timer(name);
        self.timer_generation += 1;
        let fired = TimerFired {
            name: name.to_owned(),
            generation: self.timer_generation,
            payload: AnyMessage::new(message),
        };
        let handle = if repeat {
            ctx.schedule_repeatedly(delay, delay, ctx.myself(), fired)
        } else {
            ctx.schedule_once(delay, ctx.myself(), fired)
        };
        self.timers.insert(
            name.to_owned(),
            Timer {
                generation: self.timer_generation,
                repeat,
                handle,
            },
        );
    }

    /// Cancels the timer `name`. A message of it already in flight is
    /// discarded on arrival.
    pub fn cancel_timer(&mut self, name: &str) {
        if let Some(timer) = self.timers.remove(name) {
            timer.handle.cancel();
        }
    }

    pub fn is_timer_active(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    fn cancel_state_timeout(&mut self) {
        if let Some(handle) = self.state_timeout.take() {
            handle.cancel();
        }
    }

    fn process_event(
        &mut self,
        message: AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.cancel_state_timeout();
        let definition = self.definition.clone();
        let event = Event {
            message,
            state: self.state.clone(),
            data: self.data.clone(),
        };
        let handled = definition
            .functions
            .get(&self.state)
            .and_then(|functions| {
                functions.iter().find_map(|function| function(self, &event, ctx))
            });
        let next = match handled {
            Some(next) => next,
            None => definition
                .unhandled
                .as_ref()
                .and_then(|function| function(self, &event, ctx))
                .unwrap_or_else(|| {
                    warn!(
                        "Unhandled event {:?} in state {:?} of {}.",
                        event.message,
                        event.state,
                        ctx.path()
                    );
                    event.stay()
                }),
        };
        self.apply_state(next, ctx);
        Ok(())
    }

    fn apply_state(&mut self, next: State<S, D>, ctx: &mut ActorContext<Self>) {
        if next.stop_reason.is_none()
            && !self.definition.functions.contains_key(&next.name)
        {
            let reason = Reason::Failure(format!(
                "Next state {:?} does not exist",
                next.name
            ));
            error!("{} can not go to {:?}.", ctx.path(), next.name);
            let mut stop = State::new(self.state.clone(), self.data.clone());
            stop.stop_reason = Some(reason);
            self.apply_state(stop, ctx);
            return;
        }

        for reply in &next.replies {
            match ctx.sender() {
                Some(sender) => sender.tell_any(reply.clone(), Some(ctx.myself())),
                None => ctx
                    .system()
                    .dead_letters()
                    .tell_any(reply.clone(), Some(ctx.myself())),
            }
        }

        if let Some(reason) = next.stop_reason {
            self.data = next.data;
            self.terminate(reason);
            ctx.stop_self();
            return;
        }

        if self.state != next.name || next.notifies {
            let from = self.state.clone();
            for handler in &self.definition.transitions {
                handler(&from, &next.name, ctx);
            }
            for listener in &self.listeners {
                listener.tell(
                    Transition {
                        actor: ctx.myself().clone(),
                        from: from.clone(),
                        to: next.name.clone(),
                    },
                    Some(ctx.myself()),
                );
            }
            debug!("{} went from {:?} to {:?}.", ctx.path(), from, next.name);
        }
        self.state = next.name;
        self.data = next.data;

        let timeout = next
            .timeout
            .or_else(|| self.definition.timeouts.get(&self.state).copied());
        if let Some(timeout) = timeout {
            self.schedule_state_timeout(timeout, ctx);
        }
    }

    fn schedule_state_timeout(&mut self, timeout: Duration, ctx: &ActorContext<Self>) {
        self.timeout_generation += 1;
        self.state_timeout = Some(ctx.schedule_once(
            timeout,
            ctx.myself(),
            TimeoutMarker {
                generation: self.timeout_generation,
            },
        ));
    }

    fn terminate(&mut self, reason: Reason) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.cancel_state_timeout();
        for (_, timer) in self.timers.drain() {
            timer.handle.cancel();
        }
        if let Some(handler) = &self.definition.termination {
            handler(&StopEvent {
                reason,
                state: self.state.clone(),
                data: self.data.clone(),
            });
        }
    }
}

#[async_trait]
impl<S: StateName, D: StateData> Actor for Fsm<S, D> {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if let Some(marker) = message.downcast_ref::<TimeoutMarker>() {
            if marker.generation == self.timeout_generation
                && self.state_timeout.is_some()
            {
                self.state_timeout = None;
                return self.process_event(AnyMessage::new(StateTimeout), ctx);
            }
            return Ok(());
        }
        if let Some(fired) = message.downcast_ref::<TimerFired>() {
            let current = self
                .timers
                .get(&fired.name)
                .map(|timer| (timer.generation, timer.repeat));
            return match current {
                Some((generation, repeat)) if generation == fired.generation => {
                    if !repeat {
                        self.timers.remove(&fired.name);
                    }
                    self.process_event(fired.payload.clone(), ctx)
                }
                _ => {
                    debug!("Discarding stale timer {} in {}.", fired.name, ctx.path());
                    Ok(())
                }
            };
        }
        if let Some(SubscribeTransitionCallBack(listener)) =
            message.downcast_ref::<SubscribeTransitionCallBack>()
        {
            ctx.watch(listener);
            self.listeners.insert(listener.clone());
            listener.tell(
                CurrentState {
                    actor: ctx.myself().clone(),
                    state: self.state.clone(),
                },
                Some(ctx.myself()),
            );
            return Ok(());
        }
        if let Some(UnsubscribeTransitionCallBack(listener)) =
            message.downcast_ref::<UnsubscribeTransitionCallBack>()
        {
            ctx.unwatch(listener);
            self.listeners.remove(listener);
            return Ok(());
        }
        if let Some(terminated) = message.downcast_ref::<Terminated>() {
            if self.listeners.remove(&terminated.actor) {
                return Ok(());
            }
        }
        self.process_event(message.clone(), ctx)
    }

    async fn pre_start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        if let Some(timeout) = self.definition.timeouts.get(&self.state).copied() {
            self.schedule_state_timeout(timeout, ctx);
        }
        Ok(())
    }

    async fn post_stop(&mut self, _ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        self.terminate(Reason::Shutdown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::{ActorSystem, ActorSystemSettings, SystemRef};

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Door {
        Closed,
        Open,
        Locked,
    }

    #[derive(Clone, Debug)]
    struct Push;

    impl Message for Push {}

    #[derive(Clone, Debug)]
    struct Lock;

    impl Message for Lock {}

    #[derive(Clone, Debug)]
    struct Break;

    impl Message for Break {}

    #[derive(Clone, Debug)]
    struct Tick;

    impl Message for Tick {}

    #[derive(Clone, Debug)]
    struct Restart;

    impl Message for Restart {}

    struct Probe(mpsc::UnboundedSender<AnyMessage>);

    #[async_trait]
    impl Actor for Probe {
        async fn receive(
            &mut self,
            message: &AnyMessage,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            let _ = self.0.send(message.clone());
            Ok(())
        }
    }

    async fn system() -> SystemRef {
        let (system, _) = ActorSystem::create(
            ActorSystemSettings::named("fsm"),
            CancellationToken::new(),
        )
        .unwrap();
        system
    }

    fn probe(
        system: &SystemRef,
        name: &str,
    ) -> (ActorRef, mpsc::UnboundedReceiver<AnyMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = system
            .actor_of(Props::new(move || Probe(sender.clone())), name)
            .unwrap();
        (actor, receiver)
    }

    async fn next<M: Message + Clone>(
        receiver: &mut mpsc::UnboundedReceiver<AnyMessage>,
    ) -> M {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            if let Some(message) = message.downcast::<M>() {
                return message;
            }
        }
    }

    fn door(stops: Arc<Mutex<Vec<Reason>>>) -> Props<Fsm<Door, u32>> {
        FsmBuilder::start_with(Door::Closed, 0u32)
            .when(Door::Closed, None, |_fsm, event, _ctx| {
                event.message().is::<Push>().then(|| {
                    let pushes = event.data() + 1;
                    event.goto(Door::Open).using(pushes).replying(pushes)
                })
            })
            .when(Door::Closed, None, |_fsm, event, _ctx| {
                event.message().is::<Break>().then(|| event.goto(Door::Locked))
            })
            .when(Door::Open, Some(Duration::from_millis(50)), |_fsm, event, _ctx| {
                if event.message().is::<StateTimeout>() {
                    Some(event.goto(Door::Closed))
                } else if event.message().is::<Lock>() {
                    Some(event.stop())
                } else {
                    None
                }
            })
            .on_termination(move |stop| {
                stops.lock().unwrap().push(stop.reason.clone());
            })
            .props()
    }

    #[tokio::test]
    async fn test_transitions_and_state_timeout() {
        let system = system().await;
        let stops = Arc::new(Mutex::new(Vec::new()));
        let fsm = system.actor_of(door(stops.clone()), "door").unwrap();
        let (listener, mut events) = probe(&system, "listener");

        fsm.tell(SubscribeTransitionCallBack(listener.clone()), None);
        let current: CurrentState<Door> = next(&mut events).await;
        assert_eq!(current.state, Door::Closed);

        fsm.tell(Push, Some(&listener));
        let pushes: u32 = next(&mut events).await;
        assert_eq!(pushes, 1);
        let opened: Transition<Door> = next(&mut events).await;
        assert_eq!((opened.from, opened.to), (Door::Closed, Door::Open));

        let closed: Transition<Door> = next(&mut events).await;
        assert_eq!(closed.from, Door::Open);
        assert_eq!(closed.to, Door::Closed);

        fsm.tell(Push, Some(&listener));
        fsm.tell(Lock, None);
        let pushes: u32 = next(&mut events).await;
        assert_eq!(pushes, 2);
        system.stopped(&fsm).await;
        assert_eq!(*stops.lock().unwrap(), vec![Reason::Normal]);
    }

    #[tokio::test]
    async fn test_goto_unknown_state_stops_with_failure() {
        let system = system().await;
        let stops = Arc::new(Mutex::new(Vec::new()));
        let fsm = system.actor_of(door(stops.clone()), "door").unwrap();

        fsm.tell(Break, None);
        system.stopped(&fsm).await;
        let stops = stops.lock().unwrap();
        assert_eq!(stops.len(), 1);
        assert!(matches!(&stops[0], Reason::Failure(reason) if reason.contains("Locked")));
    }

    #[tokio::test]
    async fn test_stopping_from_outside_runs_hook_once() {
        let system = system().await;
        let stops = Arc::new(Mutex::new(Vec::new()));
        let fsm = system.actor_of(door(stops.clone()), "door").unwrap();
        system.stop(&fsm);
        system.stopped(&fsm).await;
        assert_eq!(*stops.lock().unwrap(), vec![Reason::Shutdown]);
    }

    #[tokio::test]
    async fn test_restarted_timer_discards_stale_message() {
        let system = system().await;
        let (listener, mut events) = probe(&system, "ticks");
        let props = FsmBuilder::start_with(Door::Closed, listener.clone())
            .when(Door::Closed, None, |fsm, event, ctx| {
                let message = event.message();
                if message.is::<Push>() {
                    fsm.start_timer("tick", Tick, Duration::from_millis(30), false, ctx);
                    Some(event.stay())
                } else if message.is::<Restart>() {
                    // Superseded by the timer below.
                    fsm.start_timer("tick", Restart, Duration::from_millis(1), false, ctx);
                    fsm.start_timer("tick", Tick, Duration::from_millis(60), false, ctx);
                    Some(event.stay())
                } else if message.is::<Tick>() {
                    event.data().tell(fsm.is_timer_active("tick"), None);
                    Some(event.stay())
                } else {
                    None
                }
            })
            .props();
        let fsm = system.actor_of(props, "timers").unwrap();

        fsm.tell(Push, None);
        let active: bool = next(&mut events).await;
        assert!(!active);

        fsm.tell(Restart, None);
        let active: bool = next(&mut events).await;
        assert!(!active);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
    }
}
