//! Reserved CAS binding names and compiled-cache keys.
//!
//! Binding names are what the engine reads back out of a
//! [`CasResponse`](crate::cas::CasResponse); cache keys address
//! [`SessionCache`](super::SessionCache) entries.

/// Name of the active scene, bound as a CAS string.
pub const SCENE_CURRENT: &str = "SCENE_CURRENT";
/// Previously exited scenes, bound as a CAS list of strings.
pub const SCENE_PATH: &str = "SCENE_PATH";
/// Scene proposed by the PRTs of this submission, or `false`.
pub const SCENE_NEXT: &str = "SCENE_NEXT";
pub const RANDOM_SEED: &str = "RANDOM_SEED";

/// `SCENE_PATH` after the submission, with `SCENE_CURRENT` appended iff a
/// transition happened.
pub const SCENE_PATH_NEXT: &str = "__scene_path_next";
pub const SCENE_TEXT: &str = "__scene_text";
pub const SCENE_MODEL_SOLUTION: &str = "__scene_model_solution";
pub const QUESTION_MODEL_SOLUTION: &str = "__question_model_solution";
pub const LANGUAGE: &str = "%_STACK_LANG";

/// Names authors may not use for inputs or state variables.
pub const RESERVED_NAMES: &[&str] = &[SCENE_CURRENT, SCENE_PATH, SCENE_NEXT, RANDOM_SEED];

/// Binding holding the evaluated tuple of a PRT.
pub fn prt_result(prt: &str) -> String {
    format!("__prt_{prt}")
}

/// Binding echoing a state variable's value at the end of a PRT batch.
pub fn state_passthrough(name: &str) -> String {
    format!("__sv_{name}")
}

/// Binding holding the CAS verdict on an input's raw value.
pub fn input_validation(input: &str) -> String {
    format!("__val_{input}")
}

/// Binding holding the rendered display of an input's value.
pub fn input_display(input: &str) -> String {
    format!("__disp_{input}")
}

/// Binding holding an input's evaluated teacher answer.
pub fn teacher_answer(input: &str) -> String {
    format!("__tea_{input}")
}

/// Make an arbitrary name safe to embed in a CAS function name.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn question_variables_fn() -> &'static str {
    "__question_variables"
}

pub fn scene_variables_fn(scene: &str) -> String {
    format!("__scene_variables_{}", sanitize(scene))
}

pub fn prt_fn(scene: &str, prt: &str) -> String {
    format!("__prt_{}_{}", sanitize(scene), sanitize(prt))
}

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

pub const QUESTION_VARIABLES_KEY: &str = "qv";
pub const MODEL_SOLUTION_KEY: &str = "modelsolution";
pub const STATE_VARIABLES_KEY: &str = "statevariables";

pub fn scene_variables_key(scene: &str) -> String {
    format!("scene-{scene}-variables")
}

pub fn scene_text_key(scene: &str) -> String {
    format!("scene-{scene}-text")
}

pub fn scene_model_solution_key(scene: &str) -> String {
    format!("scene-{scene}-modelsolution")
}

pub fn prt_key(scene: &str, prt: &str) -> String {
    format!("scene-{scene}-prt-{prt}")
}

pub fn prt_inputs_key(scene: &str, prt: &str) -> String {
    format!("scene-{scene}-prt-{prt}|inputs")
}

/// Key under which a PRT result is cached for one scene visit. PRT names are
/// only unique within a visit, so the sequence number qualifies them.
pub fn prt_cache_key(sequence: usize, prt: &str) -> String {
    format!("prt-result-{sequence}-{prt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_follow_the_documented_shapes() {
        assert_eq!(scene_variables_key("entry"), "scene-entry-variables");
        assert_eq!(prt_key("entry", "p1"), "scene-entry-prt-p1");
        assert_eq!(prt_inputs_key("entry", "p1"), "scene-entry-prt-p1|inputs");
        assert_eq!(prt_cache_key(2, "p1"), "prt-result-2-p1");
    }

    #[test]
    fn function_names_are_sanitized() {
        assert_eq!(prt_fn("step 2", "p-1"), "__prt_step_2_p_1");
        assert_eq!(scene_variables_fn("a.b"), "__scene_variables_a_b");
    }
}
