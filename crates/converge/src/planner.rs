//! Run planner - turns configurations into per-node ordered declarations
//!
//! Configurations declare resources into a [`NodeConfiguration`] for each
//! node they apply to. Dependencies are typed [`DeclarationId`] handles into
//! that node's arena; cross-node ordering goes through named [`Barrier`]s.
//! [`RunPlan::build`] resolves everything up front so authoring errors
//! surface before any node is contacted.

use crate::error::{ReconcileError, Result};
use crate::graph;
use crate::resource::{BoxedResource, Resource};
use crate::types::{ResourceState, TargetNode};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Handle to a declaration within one node's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclarationId(usize);

impl DeclarationId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A named cross-node synchronization point
///
/// One declaration in the plan publishes it; any number of declarations on
/// any node may await it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Barrier(String);

impl Barrier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resource plus its ordering constraints
#[derive(Debug)]
pub struct ResourceDeclaration {
    /// Declaration name, unique within the node
    pub name: String,
    pub resource: BoxedResource,
    pub depends_on: Vec<DeclarationId>,
    pub awaits: Vec<Barrier>,
    pub publishes: Option<Barrier>,
    /// Only run when a dependency changed in this run
    pub after_change: bool,
}

/// Builder returned by [`NodeConfiguration::declare`]
pub struct Declared<'a> {
    id: DeclarationId,
    declaration: &'a mut ResourceDeclaration,
}

impl Declared<'_> {
    /// Require another declaration on this node to converge first
    pub fn depends_on(self, id: DeclarationId) -> Self {
        if !self.declaration.depends_on.contains(&id) {
            self.declaration.depends_on.push(id);
        }
        self
    }

    /// Require several declarations to converge first
    pub fn depends_on_all(mut self, ids: impl IntoIterator<Item = DeclarationId>) -> Self {
        for id in ids {
            self = self.depends_on(id);
        }
        self
    }

    /// Wait for a barrier published by some declaration in the plan
    pub fn awaits(self, barrier: Barrier) -> Self {
        if !self.declaration.awaits.contains(&barrier) {
            self.declaration.awaits.push(barrier);
        }
        self
    }

    /// Release a barrier once this declaration converges
    pub fn publishes(self, barrier: Barrier) -> Self {
        self.declaration.publishes = Some(barrier);
        self
    }

    /// Run only when one of the dependencies was applied in this run.
    ///
    /// Otherwise the declaration is reported unchanged without a probe.
    /// Used for fixed delays, which have no state of their own to observe.
    pub fn after_change(self) -> Self {
        self.declaration.after_change = true;
        self
    }

    pub fn id(&self) -> DeclarationId {
        self.id
    }
}

/// The declarations for one node, in authoring order
#[derive(Debug, Default)]
pub struct NodeConfiguration {
    declarations: Vec<ResourceDeclaration>,
}

impl NodeConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource on this node
    pub fn declare<R: Resource + 'static>(
        &mut self,
        name: impl Into<String>,
        resource: R,
    ) -> Declared<'_> {
        let id = DeclarationId(self.declarations.len());
        self.declarations.push(ResourceDeclaration {
            name: name.into(),
            resource: Box::new(resource),
            depends_on: Vec::new(),
            awaits: Vec::new(),
            publishes: None,
            after_change: false,
        });
        Declared {
            id,
            declaration: &mut self.declarations[id.0],
        }
    }

    /// Find a declaration by name
    pub fn find(&self, name: &str) -> Option<DeclarationId> {
        self.declarations
            .iter()
            .position(|d| d.name == name)
            .map(DeclarationId)
    }

    /// Find a declaration by name, or fail with an unresolved reference
    pub fn require(&self, from: &str, name: &str) -> Result<DeclarationId> {
        self.find(name)
            .ok_or_else(|| ReconcileError::UnresolvedReference {
                from: from.to_string(),
                reference: name.to_string(),
            })
    }

    /// Every declaration made so far
    pub fn ids(&self) -> impl Iterator<Item = DeclarationId> + '_ {
        (0..self.declarations.len()).map(DeclarationId)
    }

    /// The most recent declaration, if any
    pub fn last(&self) -> Option<DeclarationId> {
        self.declarations.len().checked_sub(1).map(DeclarationId)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// A static, per-node-instantiated set of declarations
pub trait Configuration: Send + Sync {
    /// Configuration name, used in logs and errors
    fn name(&self) -> &str;

    /// Declare this configuration's resources for `node`
    ///
    /// Configurations that do not apply to the node declare nothing.
    fn declare(&self, node: &TargetNode, out: &mut NodeConfiguration) -> Result<()>;
}

/// A node and its declarations in execution order
#[derive(Debug)]
pub struct NodePlan {
    pub node: TargetNode,
    pub declarations: Vec<ResourceDeclaration>,
    /// Topological execution order
    pub order: Vec<DeclarationId>,
}

impl NodePlan {
    /// Declarations in execution order
    pub fn ordered(&self) -> impl Iterator<Item = (DeclarationId, &ResourceDeclaration)> {
        self.order.iter().map(|&id| (id, &self.declarations[id.0]))
    }

    pub fn declaration(&self, id: DeclarationId) -> &ResourceDeclaration {
        &self.declarations[id.0]
    }

    /// Serializable view of the ordered plan
    pub fn describe(&self) -> Vec<PlannedDeclaration> {
        self.ordered()
            .map(|(_, decl)| PlannedDeclaration {
                name: decl.name.clone(),
                resource_id: decl.resource.id(),
                resource_type: decl.resource.resource_type().to_string(),
                description: decl.resource.description(),
                depends_on: decl
                    .depends_on
                    .iter()
                    .map(|dep| self.declarations[dep.0].name.clone())
                    .collect(),
                awaits: decl.awaits.iter().map(|b| b.name().to_string()).collect(),
                publishes: decl.publishes.as_ref().map(|b| b.name().to_string()),
                after_change: decl.after_change,
                desired: decl.resource.desired_state(),
            })
            .collect()
    }
}

/// One declaration as written to run artifacts and `plan` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedDeclaration {
    pub name: String,
    pub resource_id: String,
    pub resource_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub awaits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishes: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub after_change: bool,
    pub desired: ResourceState,
}

/// The full set of nodes × ordered declarations for one run
#[derive(Debug, Default)]
pub struct RunPlan {
    pub nodes: Vec<NodePlan>,
}

impl RunPlan {
    /// Instantiate every configuration for every node, then order and check.
    pub fn build(nodes: Vec<TargetNode>, configurations: &[&dyn Configuration]) -> Result<Self> {
        let mut per_node = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut out = NodeConfiguration::new();
            for configuration in configurations {
                let before = out.len();
                configuration.declare(&node, &mut out)?;
                debug!(
                    "{}: configuration {} declared {} resources",
                    node.name,
                    configuration.name(),
                    out.len() - before
                );
            }
            per_node.push((node, out));
        }
        Self::from_configurations(per_node)
    }

    /// Order and check already-declared node configurations.
    pub fn from_configurations(per_node: Vec<(TargetNode, NodeConfiguration)>) -> Result<Self> {
        check_unique_nodes(&per_node)?;
        let publishers = collect_publishers(&per_node)?;

        let mut nodes = Vec::with_capacity(per_node.len());
        for (node_index, (node, configuration)) in per_node.into_iter().enumerate() {
            let declarations = configuration.declarations;
            check_unique_resources(&node, &declarations)?;

            let names: Vec<String> = declarations.iter().map(|d| d.name.clone()).collect();
            let edges: Vec<Vec<usize>> = declarations
                .iter()
                .map(|decl| {
                    let mut deps: Vec<usize> = decl.depends_on.iter().map(|d| d.0).collect();
                    // Same-node barriers are ordinary ordering edges
                    for barrier in &decl.awaits {
                        if let Some(&(publisher_node, publisher)) = publishers.get(barrier)
                            && publisher_node == node_index
                        {
                            deps.push(publisher);
                        }
                    }
                    deps
                })
                .collect();

            let order = graph::topological_order(&names, &edges)?
                .into_iter()
                .map(DeclarationId)
                .collect();

            nodes.push(NodePlan {
                node,
                declarations,
                order,
            });
        }

        let plan = Self { nodes };
        graph::check_fleet_order(&plan, &publishers)?;
        Ok(plan)
    }

    /// Total number of declarations across all nodes
    pub fn total_declarations(&self) -> usize {
        self.nodes.iter().map(|n| n.declarations.len()).sum()
    }

    /// Check if the plan declares nothing
    pub fn is_empty(&self) -> bool {
        self.total_declarations() == 0
    }

    pub fn node(&self, name: &str) -> Option<&NodePlan> {
        self.nodes.iter().find(|n| n.node.name == name)
    }
}

/// Barrier → (node index, declaration index) of its single publisher
pub(crate) type Publishers = BTreeMap<Barrier, (usize, usize)>;

fn collect_publishers(per_node: &[(TargetNode, NodeConfiguration)]) -> Result<Publishers> {
    let mut publishers = Publishers::new();
    let mut problems = Vec::new();

    for (node_index, (node, configuration)) in per_node.iter().enumerate() {
        for (decl_index, decl) in configuration.declarations.iter().enumerate() {
            let Some(barrier) = &decl.publishes else {
                continue;
            };
            if let Some(&(other_node, other_decl)) = publishers.get(barrier) {
                let (other, _) = &per_node[other_node];
                problems.push(format!(
                    "barrier {barrier} is published by both {}/{} and {}/{}",
                    other.name,
                    per_node[other_node].1.declarations[other_decl].name,
                    node.name,
                    decl.name
                ));
            } else {
                publishers.insert(barrier.clone(), (node_index, decl_index));
            }
        }
    }

    if !problems.is_empty() {
        return Err(ReconcileError::ValidationFailure { problems });
    }

    for (node, configuration) in per_node {
        for decl in &configuration.declarations {
            for barrier in &decl.awaits {
                if !publishers.contains_key(barrier) {
                    return Err(ReconcileError::UnresolvedReference {
                        from: format!("{}/{}", node.name, decl.name),
                        reference: format!("barrier {barrier}"),
                    });
                }
            }
        }
    }

    Ok(publishers)
}

fn check_unique_nodes(per_node: &[(TargetNode, NodeConfiguration)]) -> Result<()> {
    let mut seen = HashSet::new();
    let problems: Vec<String> = per_node
        .iter()
        .filter(|(node, _)| !seen.insert(node.name.to_lowercase()))
        .map(|(node, _)| format!("node {} appears more than once", node.name))
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::ValidationFailure { problems })
    }
}

fn check_unique_resources(node: &TargetNode, declarations: &[ResourceDeclaration]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut problems = Vec::new();

    for decl in declarations {
        if !seen.insert(decl.resource.id()) {
            problems.push(format!(
                "{}: resource {} is declared more than once ({})",
                node.name,
                decl.resource.id(),
                decl.name
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::ValidationFailure { problems })
    }
}
