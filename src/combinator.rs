//! Derived events built on the functional rendezvous flavour.
//!
//! These combinators return ordinary [`Event`]s whose completion runs a
//! callback instead of waking a task: [`distribute`] fans one trigger out
//! to two targets, [`bind`] fixes a value in advance so a slotless event
//! can drive a valued one. Timeouts are just these pieces composed with a
//! timer event: arm the timer and the operation on the same targets and the
//! first to fire wins.

use crate::event::{Event, Values};
use crate::rendezvous::functional::FnCore;

/// Returns an event that forwards its completion to both `a` and `b`.
///
/// Triggering the returned event with values `v` triggers `a` and `b` each
/// exactly once with `v`; a second trigger is a no-op. Cancelling it
/// cancels both targets.
pub fn distribute<V: Values + Clone>(a: Event<V>, b: Event<V>) -> Event<V> {
    let slots = V::capture();
    let core = {
        let slots = slots.clone();
        FnCore::new(move |values| {
            if values {
                if let Some(v) = V::extract(&slots) {
                    a.trigger(v.clone());
                    b.trigger(v);
                }
            } else {
                a.cancel();
                b.cancel();
            }
        })
    };
    FnCore::arm::<V>(&core, slots)
}

/// Returns a slotless event that fires `target` with a fixed value.
///
/// Triggering the returned event delivers `value` to `target`; cancelling
/// it cancels `target`.
pub fn bind<T: Clone + 'static>(target: Event<(T,)>, value: T) -> Event<()> {
    let core = FnCore::new(move |values| {
        if values {
            target.trigger((value.clone(),));
        } else {
            target.cancel();
        }
    });
    FnCore::arm::<()>(&core, ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Slot;
    use crate::rendezvous::Rendezvous;
    use crate::test_util::init_test_logging;

    #[test]
    fn distribute_fires_both_targets_once() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let sa = Slot::new();
        let sb = Slot::new();
        let ea = r.make_event::<(i32,)>(1, (Some(sa.clone()),));
        let eb = r.make_event::<(i32,)>(2, (Some(sb.clone()),));
        let ec = distribute(ea, eb);

        ec.trigger((5,));
        assert_eq!(sa.get(), Some(5));
        assert_eq!(sb.get(), Some(5));
        assert_eq!(r.join(), Some(1));
        assert_eq!(r.join(), Some(2));

        // second trigger is a no-op
        ec.trigger((9,));
        assert_eq!(sa.get(), Some(5));
        assert_eq!(sb.get(), Some(5));
        assert_eq!(r.join(), None);
    }

    #[test]
    fn distribute_cancel_propagates() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let ea = r.make(1);
        let eb = r.make(2);
        let cancelled_a = Slot::new();
        let cancelled_b = Slot::new();
        let (ca, cb) = (cancelled_a.clone(), cancelled_b.clone());
        ea.on_trigger(move |values| ca.set(values));
        eb.on_trigger(move |values| cb.set(values));

        let ec = distribute(ea, eb);
        ec.cancel();
        assert_eq!(cancelled_a.get(), Some(false));
        assert_eq!(cancelled_b.get(), Some(false));
    }

    #[test]
    fn bind_delivers_fixed_value() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let s = Slot::new();
        let target = r.make_event::<(&'static str,)>(0, (Some(s.clone()),));
        let plain = bind(target, "bound");
        plain.trigger(());
        assert_eq!(s.get(), Some("bound"));
        assert_eq!(r.join(), Some(0));
    }

    #[test]
    fn dropping_derived_event_cancels_targets() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let ea = r.make(1);
        let eb = r.make(2);
        let observed = Slot::new();
        let o = observed.clone();
        ea.on_trigger(move |values| o.set(values));
        {
            let _ec = distribute(ea, eb);
            // dropped unarmed by anyone else: last facade cancels
        }
        assert_eq!(observed.get(), Some(false));
    }
}
