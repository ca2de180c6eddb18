//! Entity-graph metadata.
//!
//! The engine consumes a read-only graph of entity definitions:
//! attributes, relationships (to-one/to-many, direct or flattened
//! through a join table), delete rules, and locking flags. Building
//! the graph happens before any commit; during commit the model is
//! never mutated.

use std::collections::HashMap;

/// Delete rule carried on a relationship.
///
/// The engine uses delete rules as metadata only; enforcement beyond
/// write ordering belongs to the mapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteRule {
    /// No action.
    #[default]
    NoAction,
    /// Null out the foreign key on the target.
    Nullify,
    /// Delete the target along with the source.
    Cascade,
    /// Refuse deletion while targets exist.
    Deny,
}

/// Per-entity locking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Qualify updates and deletes by primary key only.
    #[default]
    None,
    /// Extend qualifiers with every attribute and join column flagged
    /// `used_for_locking`, failing the commit when zero rows match.
    Optimistic,
}

/// Metadata about one mapped attribute (column).
#[derive(Debug, Clone)]
pub struct Attribute {
    /// Logical attribute name.
    pub name: &'static str,
    /// Physical column name.
    pub column: &'static str,
    /// Whether this column is part of the primary key.
    pub primary_key: bool,
    /// Whether the store generates this column's value. At most one
    /// generated column per entity.
    pub generated: bool,
    /// Whether this attribute participates in optimistic-lock qualifiers.
    pub used_for_locking: bool,
}

impl Attribute {
    /// Create a new attribute mapped to the given column.
    pub const fn new(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            primary_key: false,
            generated: false,
            used_for_locking: false,
        }
    }

    /// Set the primary-key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set the generated flag.
    pub const fn generated(mut self, value: bool) -> Self {
        self.generated = value;
        self
    }

    /// Set the used-for-locking flag.
    pub const fn used_for_locking(mut self, value: bool) -> Self {
        self.used_for_locking = value;
        self
    }
}

/// One column pairing of a relationship join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Column on the source entity's table.
    pub source_column: &'static str,
    /// Column on the target entity's table.
    pub target_column: &'static str,
}

impl Join {
    /// Create a join pairing.
    pub const fn new(source_column: &'static str, target_column: &'static str) -> Self {
        Self {
            source_column,
            target_column,
        }
    }
}

/// Join-table shape of a flattened (many-to-many) relationship.
#[derive(Debug, Clone)]
pub struct FlattenedJoin {
    /// Physical join table name.
    pub join_table: &'static str,
    /// Join-table columns holding the source entity's key, paired with
    /// the source key columns they mirror.
    pub source_joins: Vec<Join>,
    /// Join-table columns holding the target entity's key.
    pub target_joins: Vec<Join>,
}

/// Metadata about one relationship between entities.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Relationship name, unique within the source entity.
    pub name: &'static str,
    /// Target entity name.
    pub target: &'static str,
    /// To-many (true) or to-one (false).
    pub to_many: bool,
    /// The target's primary key is partly populated from the source,
    /// so the source must be written first on insert and last on delete.
    pub to_dependent_pk: bool,
    /// Whether the join columns participate in optimistic-lock qualifiers.
    pub used_for_locking: bool,
    /// Delete rule metadata.
    pub delete_rule: DeleteRule,
    /// Direct join column pairings (empty for flattened relationships).
    pub joins: Vec<Join>,
    /// Present when the relationship spans a join table.
    pub flattened: Option<FlattenedJoin>,
}

impl Relationship {
    /// Create a direct to-one relationship.
    pub fn to_one(name: &'static str, target: &'static str, joins: Vec<Join>) -> Self {
        Self {
            name,
            target,
            to_many: false,
            to_dependent_pk: false,
            used_for_locking: false,
            delete_rule: DeleteRule::default(),
            joins,
            flattened: None,
        }
    }

    /// Create a direct to-many relationship.
    pub fn to_many(name: &'static str, target: &'static str, joins: Vec<Join>) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, target, joins)
        }
    }

    /// Create a flattened relationship through a join table.
    pub fn flattened(name: &'static str, target: &'static str, join: FlattenedJoin) -> Self {
        Self {
            name,
            target,
            to_many: true,
            to_dependent_pk: false,
            used_for_locking: false,
            delete_rule: DeleteRule::default(),
            joins: Vec::new(),
            flattened: Some(join),
        }
    }

    /// Mark the target's primary key as dependent on the source.
    pub fn to_dependent_pk(mut self, value: bool) -> Self {
        self.to_dependent_pk = value;
        self
    }

    /// Set the used-for-locking flag.
    pub fn used_for_locking(mut self, value: bool) -> Self {
        self.used_for_locking = value;
        self
    }

    /// Set the delete rule.
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }

    /// True for flattened (join-table) relationships.
    pub fn is_flattened(&self) -> bool {
        self.flattened.is_some()
    }
}

/// One mapped entity: a logical type bound to a physical table on one
/// physical store ("node").
#[derive(Debug, Clone)]
pub struct Entity {
    /// Entity name.
    pub name: &'static str,
    /// Physical table name.
    pub table: &'static str,
    /// Name of the physical store responsible for this entity.
    pub node: &'static str,
    /// Mapped attributes.
    pub attributes: Vec<Attribute>,
    /// Outgoing relationships.
    pub relationships: Vec<Relationship>,
    /// A read-only entity may never appear in any DML batch.
    pub read_only: bool,
    /// Locking strategy for updates and deletes.
    pub lock_mode: LockMode,
}

impl Entity {
    /// Create an entity bound to a table on the default node.
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            node: "default",
            attributes: Vec::new(),
            relationships: Vec::new(),
            read_only: false,
            lock_mode: LockMode::default(),
        }
    }

    /// Assign the responsible physical store.
    pub fn node(mut self, node: &'static str) -> Self {
        self.node = node;
        self
    }

    /// Add an attribute.
    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Add a relationship.
    pub fn relationship(mut self, rel: Relationship) -> Self {
        self.relationships.push(rel);
        self
    }

    /// Set the read-only flag.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set the lock mode.
    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Attributes forming the primary key.
    pub fn primary_key_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.primary_key)
    }

    /// Primary key column names.
    pub fn primary_key_columns(&self) -> Vec<&'static str> {
        self.primary_key_attributes().map(|a| a.column).collect()
    }

    /// Look up an attribute by logical name.
    pub fn attribute_named(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Look up an attribute by physical column.
    pub fn attribute_for_column(&self, column: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.column == column)
    }

    /// Look up a relationship by name.
    pub fn relationship_named(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Relationships whose source and target entity are the same,
    /// requiring instance-level write ordering.
    pub fn reflexive_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.target == self.name && !r.is_flattened())
    }

    /// To-one relationships through which this entity's primary key is
    /// partly populated from a master object: a join maps one of this
    /// entity's primary-key columns onto the master's key.
    pub fn master_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(|r| {
            !r.to_many
                && !r.is_flattened()
                && r.joins.iter().any(|j| {
                    self.attribute_for_column(j.source_column)
                        .is_some_and(|a| a.primary_key)
                })
        })
    }
}

/// The complete read-only entity graph consumed during commit.
#[derive(Debug, Clone, Default)]
pub struct EntityModel {
    entities: HashMap<&'static str, Entity>,
}

impl EntityModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity. Build time only; the model is immutable during commit.
    pub fn add(&mut self, entity: Entity) {
        self.entities.insert(entity.name, entity);
    }

    /// Look up an entity by name.
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// All entity names.
    pub fn entity_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entities.keys().copied()
    }

    /// Number of entities in the model.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when no entities are registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_entity() -> Entity {
        Entity::new("Order", "orders")
            .attribute(Attribute::new("id", "id").primary_key(true).generated(true))
            .attribute(Attribute::new("status", "status").used_for_locking(true))
            .relationship(
                Relationship::to_many(
                    "lineItems",
                    "LineItem",
                    vec![Join::new("id", "order_id")],
                )
                .to_dependent_pk(true),
            )
    }

    #[test]
    fn test_primary_key_columns() {
        let order = order_entity();
        assert_eq!(order.primary_key_columns(), vec!["id"]);
    }

    #[test]
    fn test_attribute_lookup() {
        let order = order_entity();
        assert!(order.attribute_named("status").is_some());
        assert!(order.attribute_for_column("status").is_some());
        assert!(order.attribute_named("missing").is_none());
    }

    #[test]
    fn test_master_relationships_filter() {
        let line_item = Entity::new("LineItem", "line_items")
            .attribute(Attribute::new("order_id", "order_id").primary_key(true))
            .attribute(Attribute::new("seq", "seq").primary_key(true))
            .relationship(
                Relationship::to_one("order", "Order", vec![Join::new("order_id", "id")])
                    .to_dependent_pk(true),
            )
            .relationship(Relationship::to_one(
                "product",
                "Product",
                vec![Join::new("product_id", "id")],
            ));

        let masters: Vec<_> = line_item.master_relationships().collect();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].name, "order");
    }

    #[test]
    fn test_reflexive_detection() {
        let employee = Entity::new("Employee", "employees")
            .attribute(Attribute::new("id", "id").primary_key(true))
            .relationship(Relationship::to_one(
                "manager",
                "Employee",
                vec![Join::new("manager_id", "id")],
            ));

        assert_eq!(employee.reflexive_relationships().count(), 1);
    }

    #[test]
    fn test_model_lookup() {
        let mut model = EntityModel::new();
        model.add(order_entity());
        assert!(model.entity("Order").is_some());
        assert!(model.entity("Nope").is_none());
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn test_flattened_relationship_shape() {
        let rel = Relationship::flattened(
            "categories",
            "Category",
            FlattenedJoin {
                join_table: "order_categories",
                source_joins: vec![Join::new("id", "order_id")],
                target_joins: vec![Join::new("id", "category_id")],
            },
        );
        assert!(rel.is_flattened());
        assert!(rel.to_many);
        assert!(rel.joins.is_empty());
    }
}
