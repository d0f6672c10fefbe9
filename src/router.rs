use tracing::debug;

use crate::record::{Candidate, Record};

/// Where the extraction output of one inbound turn should flow.
#[derive(Debug)]
pub enum RouteDecision {
    /// An open record is pending; merge the first candidate into it.
    Continue {
        target: Box<Record>,
        candidate: Candidate,
    },
    /// No open record; start a new one from the first candidate.
    Start { candidate: Candidate },
    /// Nothing was extracted; nothing is created or mutated.
    Nothing,
}

/// Route one turn's candidates against the farmer's open record, if any.
///
/// One record per turn: only the first candidate is used, whether continuing
/// or starting. Extra candidates in the same batch are dropped. An open
/// record stays the continuation target until it confirms; there is no
/// timeout or abandonment.
pub fn route(open: Option<Record>, candidates: Vec<Candidate>) -> RouteDecision {
    let mut candidates = candidates.into_iter();
    let Some(candidate) = candidates.next() else {
        return RouteDecision::Nothing;
    };

    let dropped = candidates.count();
    if dropped > 0 {
        debug!(dropped, "discarding extra candidates beyond the first");
    }

    match open {
        Some(target) => RouteDecision::Continue {
            target: Box::new(target),
            candidate,
        },
        None => RouteDecision::Start { candidate },
    }
}
