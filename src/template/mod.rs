//! Template rendering for node configuration
//!
//! String config values of agent, tool and human_input nodes may reference the
//! execution scope with Jinja syntax. The scope has four roots:
//!
//! - `input`: the workflow input
//! - `variables`: the branch-local variables
//! - `nodes`: outputs of nodes that already completed, keyed by node id
//! - `output`: the upstream output handed to the node
//!
//! Undefined references are errors, not empty strings.
//!
//! # Example
//!
//! ```ignore
//! use flowmux::template::TemplateEngine;
//! use serde_json::json;
//!
//! let engine = TemplateEngine::new();
//! let scope = json!({"input": {"issue": 42}});
//! let prompt = engine.render("Triage issue #{{ input.issue }}", &scope)?;
//! assert_eq!(prompt, "Triage issue #42");
//! ```

mod engine;
mod errors;
mod filters;

pub use engine::TemplateEngine;
pub use errors::TemplateError;
