//! Depth-first traversal of a strategy tree.
//!
//! ```
//! use waitkit::core::wait::{for_all, for_file, for_http, walk, Strategy, Visit};
//!
//! let mut root = Some(Strategy::from(for_all(vec![
//!     for_file("/tmp/ready").into(),
//!     for_http("/health").into(),
//! ])));
//!
//! // drop every file check
//! walk(&mut root, |strategy| {
//!     Ok(match strategy {
//!         Strategy::File(_) => Visit::Remove,
//!         _ => Visit::Continue,
//!     })
//! })
//! .unwrap();
//! ```

use crate::core::errors::{BoxError, WaitError};
use crate::core::wait::Strategy;

/// What the traversal should do after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// End the traversal.
    Stop,
    /// Unlink the node from its parent and skip its children.
    Remove,
    RemoveAndStop,
}

#[derive(Default)]
struct Outcome {
    remove: bool,
    stop: bool,
}

/// Visit `root` and then every descendant, in declaration order.
///
/// Removing the root empties the slot. An empty root is a usage error; a
/// visitor error ends the traversal and is returned.
pub fn walk<F>(root: &mut Option<Strategy>, mut visitor: F) -> Result<(), WaitError>
where
    F: FnMut(&Strategy) -> Result<Visit, BoxError>,
{
    let Some(node) = root.as_mut() else {
        return Err(WaitError::Config("root strategy is nil".to_string()));
    };

    let outcome = visit(node, &mut visitor).map_err(WaitError::Visitor)?;
    if outcome.remove {
        *root = None;
    }
    Ok(())
}

fn visit<F>(node: &mut Strategy, visitor: &mut F) -> Result<Outcome, BoxError>
where
    F: FnMut(&Strategy) -> Result<Visit, BoxError>,
{
    match visitor(node)? {
        Visit::Continue => {}
        Visit::Stop => {
            return Ok(Outcome {
                remove: false,
                stop: true,
            })
        }
        Visit::Remove => {
            return Ok(Outcome {
                remove: true,
                stop: false,
            })
        }
        Visit::RemoveAndStop => {
            return Ok(Outcome {
                remove: true,
                stop: true,
            })
        }
    }

    let Strategy::Multi(multi) = node else {
        return Ok(Outcome::default());
    };

    let children = multi.strategies_mut();
    let mut index = 0;
    while index < children.len() {
        let outcome = visit(&mut children[index], visitor)?;
        if outcome.remove {
            children.remove(index);
        } else {
            index += 1;
        }
        if outcome.stop {
            return Ok(Outcome {
                remove: false,
                stop: true,
            });
        }
    }
    Ok(Outcome::default())
}
