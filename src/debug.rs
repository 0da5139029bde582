use crate::loading::LoadingStats;
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

#[allow(unused)]
pub fn debug_loading(stats: &LoadingStats) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "loading",
            "node_updates": stats.node_updates,
            "capped_steps": stats.capped_steps,
        }))
    })
}

#[allow(unused)]
pub fn debug_iteration(iteration: usize, gap: Option<f64>, relative_gap: f64, violations: usize) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "iteration",
            "iteration": iteration,
            "gap": gap,
            "relative_gap": relative_gap,
            "violations": violations,
        }))
    })
}

#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
