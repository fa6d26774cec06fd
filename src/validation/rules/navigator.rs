//! Scoped path navigation over [`ModelElement`] trees.
//!
//! The instance scope of a rule applies at the first repeating segment on the
//! way down (the outermost array). Arrays below it are always enumerated in
//! full. When a path never crosses an array, a `Filtered` condition is
//! evaluated against the resource itself.

use crate::core::CancellationToken;
use crate::error::Result;
use crate::types::InstanceScope;
use crate::validation::model::{FieldValue, ModelElement};
use crate::validation::pointer::{push_field, push_index};

use super::expression::ExpressionEvaluator;

/// A concrete element reached by navigation.
#[derive(Clone)]
pub struct Node<'a> {
    pub element: &'a dyn ModelElement,
    /// Index-qualified path, e.g. `Patient.identifier[1].system`.
    pub path: String,
    pub pointer: String,
    scoped: bool,
}

impl<'a> Node<'a> {
    pub fn root(element: &'a dyn ModelElement, resource_type: &str, pointer: String) -> Self {
        Self {
            element,
            path: resource_type.to_string(),
            pointer,
            scoped: false,
        }
    }

    fn field(&self, name: &str, element: &'a dyn ModelElement) -> Self {
        Self {
            element,
            path: format!("{}.{name}", self.path),
            pointer: push_field(&self.pointer, name),
            scoped: self.scoped,
        }
    }

    fn item(&self, name: &str, index: usize, element: &'a dyn ModelElement) -> Self {
        Self {
            element,
            path: format!("{}.{name}[{index}]", self.path),
            pointer: push_index(&push_field(&self.pointer, name), index),
            scoped: true,
        }
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("pointer", &self.pointer)
            .finish()
    }
}

/// A path that stopped before its last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// The path the element would have, e.g. `Observation.performer[0].display`.
    pub path: String,
    /// Pointer of the deepest element that does exist.
    pub ancestor_pointer: String,
    scoped: bool,
}

#[derive(Debug, Default)]
pub struct Navigation<'a> {
    pub nodes: Vec<Node<'a>>,
    pub gaps: Vec<Gap>,
}

/// Presence of the last path segment on one holder element.
pub enum Presence<'a> {
    Absent,
    /// The field holds a single element.
    Single(Node<'a>),
    /// The field is an array; `array_pointer` addresses the array itself.
    Repeated {
        path: String,
        array_pointer: String,
        items: Vec<Node<'a>>,
        total: usize,
    },
}

pub struct Navigator<'r> {
    scope: &'r InstanceScope,
    evaluator: &'r dyn ExpressionEvaluator,
    cancel: &'r CancellationToken,
}

impl<'r> Navigator<'r> {
    pub fn new(
        scope: &'r InstanceScope,
        evaluator: &'r dyn ExpressionEvaluator,
        cancel: &'r CancellationToken,
    ) -> Self {
        Self {
            scope,
            evaluator,
            cancel,
        }
    }

    /// Every element matching `segments` below `root`, respecting the scope.
    pub fn navigate<'a>(&self, root: &Node<'a>, segments: &[&str]) -> Result<Navigation<'a>> {
        let mut frontier = vec![root.clone()];
        let mut gaps = Vec::new();

        for (depth, segment) in segments.iter().enumerate() {
            let mut next = Vec::new();
            for node in frontier {
                self.cancel.check()?;
                match self.presence(&node, segment)? {
                    Presence::Absent => gaps.push(Gap {
                        path: remaining_path(&node.path, &segments[depth..]),
                        ancestor_pointer: node.pointer.clone(),
                        scoped: node.scoped,
                    }),
                    Presence::Single(child) => next.push(child),
                    Presence::Repeated {
                        path,
                        array_pointer,
                        items,
                        total,
                    } => {
                        if total == 0 {
                            gaps.push(Gap {
                                path: remaining_path(&path, &segments[depth + 1..]),
                                ancestor_pointer: array_pointer,
                                scoped: node.scoped,
                            });
                        }
                        next.extend(items);
                    }
                }
            }
            frontier = next;
        }

        let mut navigation = Navigation {
            nodes: frontier,
            gaps,
        };
        self.filter_unscoped(root, &mut navigation)?;
        Ok(navigation)
    }

    /// The field `name` of `node`. Array items pass through the instance
    /// scope when no array above them has applied it yet.
    pub fn presence<'a>(&self, node: &Node<'a>, name: &str) -> Result<Presence<'a>> {
        Ok(match node.element.child(name) {
            None => Presence::Absent,
            Some(FieldValue::Single(element)) => Presence::Single(node.field(name, element)),
            Some(FieldValue::Repeated(elements)) => {
                let total = elements.len();
                let mut items = Vec::with_capacity(total);
                for (index, element) in elements.into_iter().enumerate() {
                    if !node.scoped {
                        match self.scope {
                            InstanceScope::All => {}
                            InstanceScope::First if index > 0 => break,
                            InstanceScope::First => {}
                            InstanceScope::Filtered { condition } => {
                                if !self.evaluator.evaluate(condition, element)? {
                                    continue;
                                }
                            }
                        }
                    }
                    items.push(node.item(name, index, element));
                }
                Presence::Repeated {
                    path: format!("{}.{name}", node.path),
                    array_pointer: push_field(&node.pointer, name),
                    items,
                    total,
                }
            }
        })
    }

    /// Every element of field `name`, ignoring the scope.
    pub fn children<'a>(node: &Node<'a>, name: &str) -> Vec<Node<'a>> {
        match node.element.child(name) {
            None => Vec::new(),
            Some(FieldValue::Single(element)) => vec![node.field(name, element)],
            Some(FieldValue::Repeated(elements)) => elements
                .into_iter()
                .enumerate()
                .map(|(index, element)| node.item(name, index, element))
                .collect(),
        }
    }

    fn filter_unscoped(&self, root: &Node<'_>, navigation: &mut Navigation<'_>) -> Result<()> {
        let InstanceScope::Filtered { condition } = self.scope else {
            return Ok(());
        };
        let any_unscoped = navigation.nodes.iter().any(|n| !n.scoped)
            || navigation.gaps.iter().any(|g| !g.scoped);
        if any_unscoped && !self.evaluator.evaluate(condition, root.element)? {
            navigation.nodes.retain(|n| n.scoped);
            navigation.gaps.retain(|g| g.scoped);
        }
        Ok(())
    }
}

fn remaining_path(base: &str, segments: &[&str]) -> String {
    segments
        .iter()
        .fold(base.to_string(), |path, segment| format!("{path}.{segment}"))
}

/// Splits a resource-relative dotted path; an empty path has no segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}
