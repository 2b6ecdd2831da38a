//! Event handling.

use crate::event::Event;

/// Trait for consuming events in simulation components.
pub trait EventHandler {
    /// Processes event.
    fn on(&mut self, event: Event);
}

/// Enables the use of pattern matching syntax for processing different types of events
/// by downcasting the event payload from [`EventData`](crate::event::EventData) to user-defined types.
///
/// Match arms need not be exhaustive. A payload matching none of the arms is logged as unhandled
/// under `ERROR` level.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use serde::Serialize;
/// use dslab_core::{cast, Event, EventHandler, Simulation, SimulationContext};
///
/// #[derive(Serialize)]
/// pub struct Ping {
///     seq: u32,
/// }
///
/// pub struct Counter {
///     last: u32,
///     ctx: SimulationContext,
/// }
///
/// impl EventHandler for Counter {
///     fn on(&mut self, event: Event) {
///         cast!(match event.data {
///             Ping { seq } => {
///                 self.last = seq;
///             }
///         })
///     }
/// }
///
/// let mut sim = Simulation::new();
/// let client = sim.create_context("client");
/// let counter = Rc::new(RefCell::new(Counter { last: 0, ctx: sim.create_context("counter") }));
/// let counter_id = sim.add_handler("counter", counter.clone());
/// client.emit(Ping { seq: 7 }, counter_id, 1.5);
/// sim.step_until_no_events();
/// assert_eq!(counter.borrow().last, 7);
/// ```
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
