// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use futures_timer::Delay;
use std::time::Duration;

/// A timer that can be re-armed or paused.
///
/// Used by the connection for its keepalive and inactivity deadlines. A
/// paused timer never fires; [`PausableTimer::tick`] stays pending forever.
pub(crate) struct PausableTimer {
    delay: Option<Delay>,
}

impl PausableTimer {
    /// An armed timer firing after `d`.
    pub(crate) fn new(d: Duration) -> Self {
        PausableTimer {
            delay: Some(Delay::new(d)),
        }
    }

    /// A timer that never fires until reset.
    pub(crate) fn paused() -> Self {
        PausableTimer { delay: None }
    }

    /// Re-arms the timer to fire after `d` from now.
    pub(crate) fn reset(&mut self, d: Duration) {
        self.delay = Some(Delay::new(d));
    }

    /// Disarms the timer.
    pub(crate) fn pause(&mut self) {
        self.delay = None;
    }

    /// Completes when the timer fires; pending forever while paused.
    ///
    /// The timer disarms itself on firing; call [`PausableTimer::reset`]
    /// to arm it again.
    pub(crate) async fn tick(&mut self) {
        match self.delay.as_mut() {
            Some(delay) => {
                delay.await;
                self.delay = None;
            }
            None => futures::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{select, Either};
    use futures::pin_mut;

    #[test]
    fn paused_timer_never_fires() {
        futures::executor::block_on(async {
            let mut paused = PausableTimer::paused();
            let mut armed = PausableTimer::new(Duration::from_millis(10));
            let p = paused.tick();
            let a = armed.tick();
            pin_mut!(p, a);
            match select(p, a).await {
                Either::Left(_) => panic!("paused timer fired"),
                Either::Right(_) => {}
            }
        });
    }

    #[test]
    fn reset_rearms() {
        futures::executor::block_on(async {
            let mut t = PausableTimer::new(Duration::from_millis(1));
            t.tick().await;
            t.reset(Duration::from_millis(1));
            t.tick().await;
        });
    }
}
