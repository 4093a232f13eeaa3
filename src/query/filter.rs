//! Filter trees: the resolved form of `where` arguments and rule predicates.
//!
//! Leaves reference attributes and relationship fields by exposed name; they
//! are bound to concrete schema objects by the predicate compiler, which lets
//! one tree compile against every member of an interface.

use crate::query::value::Value;
use crate::translate::predicate::CompiledPredicate;

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Caller literal, always bound as a fresh parameter.
    Value(Value),
    /// Path into the caller claims (`$jwt.sub` is `["sub"]`).
    Claim(Vec<String>),
}

/// Scalar comparison operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarOp {
    /// Equality; null literals compile to `IS NULL`.
    Eq,
    /// Negated equality.
    NotEq,
    /// Attribute value is one of a literal list.
    In,
    /// Negated `In`.
    NotIn,
    /// `<`; distance comparison on points.
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// Substring.
    Contains,
    /// Negated `Contains`.
    NotContains,
    /// Prefix.
    StartsWith,
    /// Negated `StartsWith`.
    NotStartsWith,
    /// Suffix.
    EndsWith,
    /// Negated `EndsWith`.
    NotEndsWith,
    /// Regular expression.
    Matches,
    /// List attribute contains the literal.
    Includes,
    /// Negated `Includes`.
    NotIncludes,
    /// Point lies exactly at a distance.
    Distance,
}

impl ScalarOp {
    /// Where-input suffix for the operator.
    pub fn suffix(self) -> &'static str {
        match self {
            ScalarOp::Eq => "",
            ScalarOp::NotEq => "_NOT",
            ScalarOp::In => "_IN",
            ScalarOp::NotIn => "_NOT_IN",
            ScalarOp::Lt => "_LT",
            ScalarOp::Lte => "_LTE",
            ScalarOp::Gt => "_GT",
            ScalarOp::Gte => "_GTE",
            ScalarOp::Contains => "_CONTAINS",
            ScalarOp::NotContains => "_NOT_CONTAINS",
            ScalarOp::StartsWith => "_STARTS_WITH",
            ScalarOp::NotStartsWith => "_NOT_STARTS_WITH",
            ScalarOp::EndsWith => "_ENDS_WITH",
            ScalarOp::NotEndsWith => "_NOT_ENDS_WITH",
            ScalarOp::Matches => "_MATCHES",
            ScalarOp::Includes => "_INCLUDES",
            ScalarOp::NotIncludes => "_NOT_INCLUDES",
            ScalarOp::Distance => "_DISTANCE",
        }
    }

    /// Operator name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ScalarOp::Eq => "EQUALS",
            other => other.suffix().trim_start_matches('_'),
        }
    }

    /// Positive operator when `self` is a negated form.
    pub fn negated_base(self) -> Option<ScalarOp> {
        match self {
            ScalarOp::NotEq => Some(ScalarOp::Eq),
            ScalarOp::NotIn => Some(ScalarOp::In),
            ScalarOp::NotContains => Some(ScalarOp::Contains),
            ScalarOp::NotStartsWith => Some(ScalarOp::StartsWith),
            ScalarOp::NotEndsWith => Some(ScalarOp::EndsWith),
            ScalarOp::NotIncludes => Some(ScalarOp::Includes),
            _ => None,
        }
    }

    /// Operators tried when splitting a where-input key, longest suffix first.
    pub const PARSE_ORDER: [ScalarOp; 17] = [
        ScalarOp::NotStartsWith,
        ScalarOp::NotEndsWith,
        ScalarOp::NotContains,
        ScalarOp::NotIncludes,
        ScalarOp::StartsWith,
        ScalarOp::EndsWith,
        ScalarOp::Contains,
        ScalarOp::Includes,
        ScalarOp::Distance,
        ScalarOp::Matches,
        ScalarOp::NotIn,
        ScalarOp::NotEq,
        ScalarOp::Lte,
        ScalarOp::Gte,
        ScalarOp::In,
        ScalarOp::Lt,
        ScalarOp::Gt,
    ];
}

/// Comparison against an attribute of the bound node or edge.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarCondition {
    /// Exposed attribute name.
    pub field: String,
    /// Operator.
    pub op: ScalarOp,
    /// Literal or claim reference.
    pub operand: Operand,
}

/// Relationship quantifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// At least one related node matches.
    Some,
    /// No related node matches.
    None,
    /// Exactly one related node matches.
    Single,
    /// At least one related node exists and every one matches.
    All,
}

impl Quantifier {
    /// Where-input suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            Quantifier::Some => "_SOME",
            Quantifier::None => "_NONE",
            Quantifier::Single => "_SINGLE",
            Quantifier::All => "_ALL",
        }
    }
}

/// Quantified condition over related nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipCondition {
    /// Relationship field.
    pub field: String,
    /// Quantifier.
    pub quantifier: Quantifier,
    /// Condition on the related node (and edge, via [`FilterTree::Edge`]).
    pub filter: Option<Box<FilterTree>>,
}

/// Aggregate functions over related attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// `min(x)`
    Min,
    /// `max(x)`
    Max,
    /// `sum(x)`
    Sum,
    /// `avg(x)`
    Average,
    /// `min(size(x))`
    ShortestLength,
    /// `max(size(x))`
    LongestLength,
    /// `avg(size(x))`
    AverageLength,
}

impl AggregateFunction {
    /// Where-input infix, e.g. `_SHORTEST_LENGTH`.
    pub fn infix(self) -> &'static str {
        match self {
            AggregateFunction::Min => "_MIN",
            AggregateFunction::Max => "_MAX",
            AggregateFunction::Sum => "_SUM",
            AggregateFunction::Average => "_AVERAGE",
            AggregateFunction::ShortestLength => "_SHORTEST_LENGTH",
            AggregateFunction::LongestLength => "_LONGEST_LENGTH",
            AggregateFunction::AverageLength => "_AVERAGE_LENGTH",
        }
    }

    /// Whether the function measures string length.
    pub fn is_length(self) -> bool {
        matches!(
            self,
            AggregateFunction::ShortestLength
                | AggregateFunction::LongestLength
                | AggregateFunction::AverageLength
        )
    }

    /// Cypher aggregate applied to the (possibly `size()`-wrapped) value.
    pub fn cypher(self) -> &'static str {
        match self {
            AggregateFunction::Min | AggregateFunction::ShortestLength => "min",
            AggregateFunction::Max | AggregateFunction::LongestLength => "max",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average | AggregateFunction::AverageLength => "avg",
        }
    }

    /// Infixes tried when parsing, longest first.
    pub const PARSE_ORDER: [AggregateFunction; 7] = [
        AggregateFunction::ShortestLength,
        AggregateFunction::LongestLength,
        AggregateFunction::AverageLength,
        AggregateFunction::Average,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Sum,
    ];
}

/// Comparators usable in aggregate conditions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl Comparator {
    /// Cypher operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
        }
    }

    /// Where-input suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            Comparator::Eq => "_EQUAL",
            Comparator::Lt => "_LT",
            Comparator::Lte => "_LTE",
            Comparator::Gt => "_GT",
            Comparator::Gte => "_GTE",
        }
    }

    /// Suffixes tried when parsing, longest first.
    pub const PARSE_ORDER: [Comparator; 5] = [
        Comparator::Eq,
        Comparator::Lte,
        Comparator::Gte,
        Comparator::Lt,
        Comparator::Gt,
    ];
}

/// Aggregate over one attribute of the related nodes or edges.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeAggregate {
    /// Exposed attribute name.
    pub field: String,
    /// Function.
    pub function: AggregateFunction,
    /// Comparator.
    pub comparator: Comparator,
    /// Numeric literal.
    pub value: Value,
}

/// Boolean tree of aggregate comparisons.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateFilter {
    /// `count(node) <op> value`
    Count {
        /// Comparator.
        comparator: Comparator,
        /// Integer literal.
        value: Value,
    },
    /// Aggregate over a related node attribute.
    Node(AttributeAggregate),
    /// Aggregate over an edge property.
    Edge(AttributeAggregate),
    /// Conjunction.
    And(Vec<AggregateFilter>),
    /// Disjunction.
    Or(Vec<AggregateFilter>),
    /// Negation.
    Not(Box<AggregateFilter>),
}

impl AggregateFilter {
    /// Whether any leaf aggregates edge properties.
    pub fn uses_edge(&self) -> bool {
        match self {
            AggregateFilter::Edge(_) => true,
            AggregateFilter::Count { .. } | AggregateFilter::Node(_) => false,
            AggregateFilter::And(children) | AggregateFilter::Or(children) => {
                children.iter().any(AggregateFilter::uses_edge)
            }
            AggregateFilter::Not(child) => child.uses_edge(),
        }
    }

    fn leaf_count(&self) -> usize {
        match self {
            AggregateFilter::Count { .. } | AggregateFilter::Node(_) | AggregateFilter::Edge(_) => 1,
            AggregateFilter::And(children) | AggregateFilter::Or(children) => {
                children.iter().map(AggregateFilter::leaf_count).sum()
            }
            AggregateFilter::Not(child) => child.leaf_count(),
        }
    }
}

/// Aggregate condition over a relationship.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateCondition {
    /// Relationship field.
    pub field: String,
    /// Condition on the aggregates.
    pub filter: AggregateFilter,
}

/// Condition on the caller claims alone.
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimCondition {
    /// Claim path.
    pub path: Vec<String>,
    /// Operator (`Includes` means the literal is in a list claim).
    pub op: ScalarOp,
    /// Literal.
    pub value: Value,
}

/// Recursive boolean predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterTree {
    /// Attribute comparison on the bound node or edge.
    Scalar(ScalarCondition),
    /// Quantified relationship condition.
    Relationship(RelationshipCondition),
    /// Relationship existence (`actors: null` is `exists: false`).
    Exists {
        /// Relationship field.
        field: String,
        /// Whether at least one related node must exist.
        exists: bool,
    },
    /// Aggregate condition.
    Aggregate(AggregateCondition),
    /// Claims-only condition (authorization rules only).
    Claim(ClaimCondition),
    /// Switches scalar leaves to the edge bound by the enclosing relationship.
    Edge(Box<FilterTree>),
    /// Restricts an abstract-typed node to one member.
    OfType {
        /// Member entity name.
        entity: String,
        /// Condition evaluated with the member's attributes.
        filter: Option<Box<FilterTree>>,
    },
    /// Conjunction; empty means "no predicate".
    And(Vec<FilterTree>),
    /// Disjunction; empty is `false`.
    Or(Vec<FilterTree>),
    /// Negation.
    Not(Box<FilterTree>),
    /// Compiled authorization guard. Only built by the authorization compiler.
    Guard(CompiledPredicate),
}

/// Size of a filter tree, checked against the configured limits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterStats {
    /// Total node count.
    pub nodes: usize,
    /// Maximum nesting depth.
    pub depth: usize,
}

impl FilterTree {
    /// Scalar equality leaf.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterTree::scalar(field, ScalarOp::Eq, value)
    }

    /// Scalar leaf with a literal operand.
    pub fn scalar(field: impl Into<String>, op: ScalarOp, value: impl Into<Value>) -> Self {
        FilterTree::Scalar(ScalarCondition {
            field: field.into(),
            op,
            operand: Operand::Value(value.into()),
        })
    }

    /// Joins trees with AND, collapsing single-element conjunctions.
    pub fn all(mut parts: Vec<FilterTree>) -> Option<FilterTree> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(FilterTree::And(parts)),
        }
    }

    /// Node count and depth, checked against the configured filter limits.
    pub fn stats(&self) -> FilterStats {
        let (nodes, depth) = match self {
            FilterTree::Scalar(_) | FilterTree::Exists { .. } | FilterTree::Claim(_) => (1, 1),
            FilterTree::Guard(_) => (1, 1),
            FilterTree::Aggregate(cond) => (1 + cond.filter.leaf_count(), 2),
            FilterTree::Relationship(cond) => match &cond.filter {
                Some(child) => {
                    let stats = child.stats();
                    (stats.nodes + 1, stats.depth + 1)
                }
                None => (1, 1),
            },
            FilterTree::OfType { filter, .. } => match filter {
                Some(child) => {
                    let stats = child.stats();
                    (stats.nodes + 1, stats.depth + 1)
                }
                None => (1, 1),
            },
            FilterTree::Edge(child) | FilterTree::Not(child) => {
                let stats = child.stats();
                (stats.nodes + 1, stats.depth + 1)
            }
            FilterTree::And(children) | FilterTree::Or(children) => {
                let mut nodes = 1;
                let mut max_depth = 0;
                for child in children {
                    let stats = child.stats();
                    nodes += stats.nodes;
                    max_depth = max_depth.max(stats.depth);
                }
                (nodes, max_depth + 1)
            }
        };
        FilterStats { nodes, depth }
    }

    /// Whether evaluating the tree requires matching related nodes.
    ///
    /// Non-traversing conjuncts are checked before the ones that need related
    /// nodes.
    pub fn traverses(&self) -> bool {
        match self {
            FilterTree::Scalar(_) | FilterTree::Claim(_) => false,
            FilterTree::Relationship(_) | FilterTree::Exists { .. } | FilterTree::Aggregate(_) => {
                true
            }
            FilterTree::Guard(guard) => !guard.preludes.is_empty() || guard.expr.contains("MATCH"),
            FilterTree::Edge(child) | FilterTree::Not(child) => child.traverses(),
            FilterTree::OfType { filter, .. } => filter.as_ref().is_some_and(|f| f.traverses()),
            FilterTree::And(children) | FilterTree::Or(children) => {
                children.iter().any(FilterTree::traverses)
            }
        }
    }

    /// Whether a scalar leaf is evaluated against the enclosing edge.
    pub fn uses_edge(&self) -> bool {
        match self {
            FilterTree::Edge(_) => true,
            FilterTree::Not(child) => child.uses_edge(),
            FilterTree::OfType { filter, .. } => filter.as_ref().is_some_and(|f| f.uses_edge()),
            FilterTree::And(children) | FilterTree::Or(children) => {
                children.iter().any(FilterTree::uses_edge)
            }
            _ => false,
        }
    }

    /// Splits a tree into conjuncts that can be evaluated on the bound node
    /// alone and the rest.
    pub fn split_pushdown(self) -> (Option<FilterTree>, Option<FilterTree>) {
        match self {
            FilterTree::And(children) => {
                let (residual, pushdown): (Vec<_>, Vec<_>) =
                    children.into_iter().partition(FilterTree::traverses);
                (FilterTree::all(pushdown), FilterTree::all(residual))
            }
            tree if tree.traverses() => (None, Some(tree)),
            tree => (Some(tree), None),
        }
    }
}
