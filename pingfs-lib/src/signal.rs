// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A one-shot completion signal shared between callers, the receiver
//! task and the timer task (spec §4.2 Design Notes: "prefer a
//! completion future/promise/channel per Read... callers compose by
//! awaiting / joining"; spec §5: "firing the signal either from the
//! receive path or from the timer makes any subsequent handling a
//! no-op for that op").

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

enum State<T> {
    Pending,
    Done(T),
}

pub struct Signal<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending),
            cond: Condvar::new(),
        })
    }

    /// Completes the signal with `value`. Returns `true` if this call
    /// was the one that did it; a later call (from the other task
    /// racing to resolve the same op) is a no-op and returns `false`.
    pub fn fire(&self, value: T) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::Done(_)) {
            return false;
        }
        *state = State::Done(value);
        self.cond.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Done(_))
    }

    /// Blocks until the signal fires, then returns the completed value.
    pub fn wait(&self) -> T {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                State::Done(v) => return v.clone(),
                State::Pending => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Blocks up to `timeout`; `None` if it doesn't fire in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let mut remaining = timeout;
        loop {
            match &*state {
                State::Done(v) => return Some(v.clone()),
                State::Pending => {
                    let started = std::time::Instant::now();
                    let (guard, result) = self.cond.wait_timeout(state, remaining).unwrap();
                    state = guard;
                    if result.timed_out() {
                        if let State::Done(v) = &*state {
                            return Some(v.clone());
                        }
                        return None;
                    }
                    remaining = remaining.saturating_sub(started.elapsed());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_is_idempotent() {
        let sig = Signal::<u32>::new();
        assert!(sig.fire(1));
        assert!(!sig.fire(2));
        assert_eq!(sig.wait(), 1);
    }

    #[test]
    fn wait_timeout_returns_none_when_never_fired() {
        let sig = Signal::<u32>::new();
        assert_eq!(sig.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn wait_timeout_returns_value_once_fired_from_another_thread() {
        let sig = Signal::<u32>::new();
        let sig2 = sig.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sig2.fire(42);
        });
        assert_eq!(sig.wait_timeout(Duration::from_secs(2)), Some(42));
        handle.join().unwrap();
    }
}
