//! Resumable step functions.
//!
//! Interaction scripts are written as a `loop { match rsf.point() { .. } }`
//! over numbered resumption points. The script owns its [`Resumable`] and
//! borrows it mutably for one call at a time, so a step function can never be
//! re-entered while it is already running.
//!
//! ```
//! use hub_core::resumable::Resumable;
//! use hub_core::Millis;
//!
//! fn count_to_three(rsf: &mut Resumable<u8, Millis>) -> Option<u8> {
//!     loop {
//!         match rsf.point() {
//!             0 => {
//!                 rsf.locals += 1;
//!                 if rsf.locals < 3 {
//!                     return rsf.suspend(0, None);
//!                 }
//!                 rsf.goto(1);
//!             }
//!             _ => {
//!                 let total = rsf.locals;
//!                 rsf.finish();
//!                 return Some(total);
//!             }
//!         }
//!     }
//! }
//!
//! let mut rsf = Resumable::default();
//! assert_eq!(count_to_three(&mut rsf), None);
//! assert_eq!(count_to_three(&mut rsf), None);
//! assert_eq!(count_to_three(&mut rsf), Some(3));
//! ```

use core::ops::ControlFlow;
use core::time::Duration;

use crate::time::HubInstant;

/// Identifier of a resumption point inside a step function body.
pub type Point = u16;

/// Saved execution state of a step function.
#[derive(Clone, Debug)]
pub struct Resumable<L, TInstant> {
    point: Point,
    sleep_started: Option<TInstant>,
    /// Values that must survive between invocations.
    pub locals: L,
}

impl<L, TInstant> Resumable<L, TInstant>
where
    L: Default,
    TInstant: HubInstant,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_locals(L::default())
    }

    /// Resets to the top of the body with default locals.
    pub fn finish(&mut self) {
        self.point = 0;
        self.sleep_started = None;
        self.locals = L::default();
    }
}

impl<L, TInstant> Resumable<L, TInstant>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub const fn with_locals(locals: L) -> Self {
        Self {
            point: 0,
            sleep_started: None,
            locals,
        }
    }

    /// Point the next invocation resumes at. Zero is the top of the body.
    #[must_use]
    pub const fn point(&self) -> Point {
        self.point
    }

    /// True while the body is between its first suspension and `finish`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.point != 0
    }

    /// Moves to `next` without returning to the caller.
    pub fn goto(&mut self, next: Point) {
        self.point = next;
    }

    /// Records `next` as the resumption point and hands `value` back so the
    /// body can `return` it.
    pub fn suspend<R>(&mut self, next: Point, value: R) -> R {
        self.point = next;
        value
    }

    /// Suspends at `here` until `ready` holds.
    pub fn wait_until<R>(&mut self, here: Point, ready: bool, value: R) -> ControlFlow<R> {
        if ready {
            ControlFlow::Continue(())
        } else {
            self.point = here;
            ControlFlow::Break(value)
        }
    }

    /// Suspends at `here` until `duration` has elapsed since the first call
    /// made at this point.
    pub fn sleep<R>(
        &mut self,
        here: Point,
        now: TInstant,
        duration: Duration,
        value: R,
    ) -> ControlFlow<R> {
        let started = *self.sleep_started.get_or_insert(now);
        if now >= started + duration {
            self.sleep_started = None;
            ControlFlow::Continue(())
        } else {
            self.point = here;
            ControlFlow::Break(value)
        }
    }
}

impl<L, TInstant> Default for Resumable<L, TInstant>
where
    L: Default,
    TInstant: HubInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
