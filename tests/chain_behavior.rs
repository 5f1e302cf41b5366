// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordering and execution behaviour of chains built from provider lists.

use sluice::phase::names;
use sluice::{
    ChainError, ChainState, InterceptorBase, InterceptorList, InterceptorSource, Message, Phase,
    PhaseChainCache, PhaseInterceptorChain, PhaseManager, PhaseSet,
};

mod common;
use common::{entries, journal, Behavior, Recording};

fn read_invoke_write() -> PhaseSet {
    PhaseSet::new(vec![
        Phase::new("read", 0),
        Phase::new("invoke", 10),
        Phase::new("write", 20),
    ])
    .unwrap()
}

#[test]
fn test_constraint_example_resolves_to_z_y_x() {
    let log = journal();
    let list = InterceptorList::new();
    list.push(Recording::new(
        InterceptorBase::new("X", "invoke").run_after("Y"),
        Behavior::Pass,
        &log,
    ));
    list.push(Recording::pass("Y", "invoke", &log));
    list.push(Recording::pass("Z", "read", &log));

    let cache = PhaseChainCache::new();
    let mut chain = cache
        .get(&read_invoke_write(), &[InterceptorSource::from(&list)])
        .unwrap();
    assert_eq!(chain.interceptor_ids(), vec!["Z", "Y", "X"]);

    let mut message = Message::inbound();
    assert_eq!(chain.do_intercept(&mut message).unwrap(), ChainState::Complete);
    assert_eq!(entries(&log), vec!["msg:Z", "msg:Y", "msg:X"]);
}

#[test]
fn test_ordering_is_deterministic() {
    let log = journal();
    let interceptors = vec![
        Recording::new(
            InterceptorBase::new("c", "invoke").run_before("a"),
            Behavior::Pass,
            &log,
        ),
        Recording::pass("a", "invoke", &log),
        Recording::pass("w", "write", &log),
        Recording::new(
            InterceptorBase::new("b", "invoke").run_after("a"),
            Behavior::Pass,
            &log,
        ),
        Recording::pass("r", "read", &log),
    ];
    let phases = read_invoke_write();

    let first = PhaseInterceptorChain::build(&phases, &[interceptors.as_slice()]).unwrap();
    for _ in 0..10 {
        let again = PhaseInterceptorChain::build(&phases, &[interceptors.as_slice()]).unwrap();
        assert_eq!(again.interceptor_ids(), first.interceptor_ids());
    }
    assert_eq!(first.interceptor_ids(), vec!["r", "c", "a", "b", "w"]);
}

#[test]
fn test_constraints_hold_regardless_of_insertion_order() {
    let log = journal();
    let phases = read_invoke_write();
    let late = || {
        Recording::new(
            InterceptorBase::new("late", "invoke").run_after("early"),
            Behavior::Pass,
            &log,
        )
    };
    let early = || Recording::pass("early", "invoke", &log);

    let forward = PhaseInterceptorChain::build(&phases, &[&[early(), late()]]).unwrap();
    let backward = PhaseInterceptorChain::build(&phases, &[&[late(), early()]]).unwrap();
    assert_eq!(forward.interceptor_ids(), vec!["early", "late"]);
    assert_eq!(backward.interceptor_ids(), vec!["early", "late"]);
}

#[test]
fn test_cross_phase_references_are_ignored() {
    let log = journal();
    // Asking to run before an interceptor of an earlier phase has no effect.
    let interceptors = vec![
        Recording::pass("reader", "read", &log),
        Recording::new(
            InterceptorBase::new("invoker", "invoke").run_before("reader"),
            Behavior::Pass,
            &log,
        ),
    ];
    let chain = PhaseInterceptorChain::build(&read_invoke_write(), &[interceptors.as_slice()]).unwrap();
    assert_eq!(chain.interceptor_ids(), vec!["reader", "invoker"]);
}

#[test]
fn test_cycle_names_participants() {
    let log = journal();
    let interceptors = vec![
        Recording::pass("bystander", "invoke", &log),
        Recording::new(
            InterceptorBase::new("p", "invoke").run_before("q"),
            Behavior::Pass,
            &log,
        ),
        Recording::new(
            InterceptorBase::new("q", "invoke").run_before("p"),
            Behavior::Pass,
            &log,
        ),
    ];
    let err = PhaseInterceptorChain::build(&read_invoke_write(), &[interceptors.as_slice()]).unwrap_err();
    match err {
        ChainError::OrderingCycle {
            phase,
            interceptors,
        } => {
            assert_eq!(phase, "invoke");
            assert_eq!(interceptors, vec!["p".to_string(), "q".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_phase_is_a_configuration_error() {
    let log = journal();
    let interceptors = vec![Recording::pass("stray", "marshal", &log)];
    let err = PhaseInterceptorChain::build(&read_invoke_write(), &[interceptors.as_slice()]).unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("stray"));
    assert!(err.to_string().contains("marshal"));
}

#[test]
fn test_fault_branch_walks_forward_then_unwinds() {
    let log = journal();
    let interceptors = vec![
        Recording::pass("A", names::READ, &log),
        Recording::new(InterceptorBase::new("B", names::UNMARSHAL), Behavior::Fail, &log),
        Recording::pass("C", names::INVOKE, &log),
    ];
    let phases = PhaseManager::default().in_phases().clone();
    let mut chain = PhaseInterceptorChain::build(&phases, &[interceptors.as_slice()]).unwrap();

    let mut message = Message::inbound();
    let err = chain.do_intercept(&mut message).unwrap_err();

    assert!(matches!(err, ChainError::Fault(ref fault) if fault.message() == "B failed"));
    assert_eq!(chain.state(), ChainState::Faulted);
    assert!(message.has_fault());
    assert_eq!(
        entries(&log),
        vec!["msg:A", "msg:B", "fault:C", "fault:B", "fault:A"]
    );
}

#[test]
fn test_suspend_resume_never_reruns() {
    let log = journal();
    let interceptors = vec![
        Recording::pass("A", names::READ, &log),
        Recording::new(InterceptorBase::new("B", names::UNMARSHAL), Behavior::Suspend, &log),
        Recording::pass("C", names::INVOKE, &log),
    ];
    let phases = PhaseManager::default().in_phases().clone();
    let mut chain = PhaseInterceptorChain::build(&phases, &[interceptors.as_slice()]).unwrap();

    let mut message = Message::inbound();
    assert_eq!(chain.do_intercept(&mut message).unwrap(), ChainState::Paused);
    assert_eq!(entries(&log), vec!["msg:A", "msg:B"]);

    assert_eq!(chain.resume(&mut message).unwrap(), ChainState::Complete);
    assert_eq!(entries(&log), vec!["msg:A", "msg:B", "msg:C"]);
}

#[test]
fn test_bus_and_endpoint_sources_merge_by_phase() {
    let log = journal();
    let bus = InterceptorList::new();
    let endpoint = InterceptorList::new();
    bus.push(Recording::pass("bus-invoke", "invoke", &log));
    endpoint.push(Recording::pass("endpoint-read", "read", &log));
    endpoint.push(Recording::new(
        InterceptorBase::new("endpoint-invoke", "invoke").run_before("bus-invoke"),
        Behavior::Pass,
        &log,
    ));

    let cache = PhaseChainCache::new();
    let sources = [InterceptorSource::from(&bus), InterceptorSource::from(&endpoint)];
    let chain = cache.get(&read_invoke_write(), &sources).unwrap();
    assert_eq!(
        chain.interceptor_ids(),
        vec!["endpoint-read", "endpoint-invoke", "bus-invoke"]
    );
}
