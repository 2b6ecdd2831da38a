use std::collections::BinaryHeap;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};

pub struct SimulationState {
    clock: f64,
    events: BinaryHeap<Event>,
    event_count: u64,
}

impl SimulationState {
    pub fn new() -> Self {
        Self {
            clock: 0.,
            events: BinaryHeap::new(),
            event_count: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn advance_to(&mut self, time: f64) {
        if time > self.clock {
            self.clock = time;
        }
    }

    pub fn add_event<T>(&mut self, data: T, src: Id, dest: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        assert!(delay >= 0., "event delay must be non-negative, got {}", delay);
        let id = self.event_count;
        self.events.push(Event {
            id,
            time: self.clock + delay,
            src,
            dest,
            data: Box::new(data),
        });
        self.event_count += 1;
        id
    }

    pub fn next_event(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.clock = event.time;
        Some(event)
    }

    pub fn peek_event(&self) -> Option<&Event> {
        self.events.peek()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}
