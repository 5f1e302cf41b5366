// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::cache::PhaseChainCache;
    use crate::chain::{ChainState, PhaseInterceptorChain};
    use crate::core::{Fault, Message, PhaseInterceptor};
    use crate::interceptor::{InterceptorBase, InterceptorList, InterceptorSource};
    use crate::phase::PhaseSet;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Noop {
        base: InterceptorBase,
    }

    impl PhaseInterceptor for Noop {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn phase(&self) -> &str {
            self.base.phase()
        }

        fn before(&self) -> &BTreeSet<String> {
            self.base.before()
        }

        fn after(&self) -> &BTreeSet<String> {
            self.base.after()
        }

        fn handle_message(
            &self,
            _message: &mut Message,
            chain: &mut PhaseInterceptorChain,
        ) -> Result<(), Fault> {
            if self.id() == "pause" {
                chain.suspend();
            }
            Ok(())
        }
    }

    fn noop(base: InterceptorBase) -> Arc<dyn PhaseInterceptor> {
        Arc::new(Noop { base })
    }

    fn phases() -> PhaseSet {
        PhaseSet::from_names(&["one", "two"]).unwrap()
    }

    #[test]
    fn test_hit_does_not_rebuild() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("a", "one")));
        let phases = phases();

        assert!(!cache.is_populated());
        let first = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        let second = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();

        assert!(cache.is_populated());
        assert_eq!(cache.build_count(), 1);
        assert_eq!(first.interceptor_ids(), second.interceptor_ids());
        assert!(first.template().shares_order_with(&second));
    }

    #[test]
    fn test_list_change_invalidates() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("b", "two")));
        let phases = phases();

        cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        list.push(noop(InterceptorBase::new("a", "two").run_before("b")));
        let chain = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();

        assert_eq!(cache.build_count(), 2);
        assert_eq!(chain.interceptor_ids(), vec!["a", "b"]);

        list.remove("b");
        let chain = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(cache.build_count(), 3);
        assert_eq!(chain.interceptor_ids(), vec!["a"]);
    }

    #[test]
    fn test_push_then_remove_is_still_a_change() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("a", "one")));
        let phases = phases();

        cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        list.push(noop(InterceptorBase::new("b", "one")));
        list.remove("b");
        cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();

        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_plain_lists_compare_element_identity() {
        let cache = PhaseChainCache::new();
        let phases = phases();
        let a = noop(InterceptorBase::new("a", "one"));
        let plain = vec![a.clone()];

        cache.get(&phases, &[InterceptorSource::from(&plain)]).unwrap();
        let same = vec![a];
        cache.get(&phases, &[InterceptorSource::from(&same)]).unwrap();
        assert_eq!(cache.build_count(), 1);

        // Equal id, different instance.
        let other = vec![noop(InterceptorBase::new("a", "one"))];
        cache.get(&phases, &[InterceptorSource::from(&other)]).unwrap();
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_source_shape_change_rebuilds() {
        let cache = PhaseChainCache::new();
        let phases = phases();
        let list = InterceptorList::new();
        let extra = InterceptorList::new();

        cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        let sources = [InterceptorSource::from(&list), InterceptorSource::from(&extra)];
        cache.get(&phases, &sources).unwrap();
        assert_eq!(cache.build_count(), 2);

        // A different list with the same contents is a different source.
        let twin = InterceptorList::new();
        let sources = [InterceptorSource::from(&list), InterceptorSource::from(&twin)];
        cache.get(&phases, &sources).unwrap();
        assert_eq!(cache.build_count(), 3);
    }

    #[test]
    fn test_phase_change_rebuilds() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("a", "one")));

        cache.get(&phases(), &[InterceptorSource::from(&list)]).unwrap();
        cache.get(&phases(), &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(cache.build_count(), 1);

        let reordered = PhaseSet::from_names(&["zero", "one", "two"]).unwrap();
        cache.get(&reordered, &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_build_errors_are_not_cached() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("lost", "nowhere")));

        assert!(cache.get(&phases(), &[InterceptorSource::from(&list)]).is_err());
        assert!(!cache.is_populated());
        assert_eq!(cache.build_count(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();

        cache.get(&phases(), &[InterceptorSource::from(&list)]).unwrap();
        cache.clear();
        assert!(!cache.is_populated());
        cache.get(&phases(), &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_instances_have_independent_state() {
        let cache = PhaseChainCache::new();
        let list = InterceptorList::new();
        list.push(noop(InterceptorBase::new("pause", "one")));
        list.push(noop(InterceptorBase::new("after", "two")));
        let phases = phases();

        let mut paused = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        let mut message = Message::inbound();
        assert_eq!(paused.do_intercept(&mut message).unwrap(), ChainState::Paused);

        let mut fresh = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(fresh.state(), ChainState::Ready);
        assert_eq!(fresh.position(), 0);

        fresh.remove("after");
        let again = cache.get(&phases, &[InterceptorSource::from(&list)]).unwrap();
        assert_eq!(again.interceptor_ids(), vec!["pause", "after"]);
        assert_eq!(paused.len(), 2);
        assert_eq!(paused.resume(&mut message).unwrap(), ChainState::Complete);
    }
}
