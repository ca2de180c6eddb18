//! Dependency ordering for entities and, where relationships are
//! reflexive, for individual instances.
//!
//! Entity ordering follows primary-key dependency: a master whose key
//! feeds a dependent's primary key must be written first on insert and
//! last on delete. Cycles between entities are legal; each strongly
//! connected component is contracted to a single node and ordered as a
//! unit, with foreign-key ordering inside the component left to the
//! instance level. A cycle between instances of one entity over its
//! reflexive relationships is not resolvable and fails the commit.

use crate::store::ObjectStore;
use relsync_core::{Entity, EntityModel, ObjectId, Result, ValidationError};
use std::collections::HashMap;

/// Precomputed topological ranks over the entity dependency graph.
#[derive(Debug)]
pub struct EntitySorter {
    index: HashMap<String, usize>,
    /// Topological rank of each entity's component, indexed by entity.
    rank: Vec<usize>,
}

impl EntitySorter {
    /// Build the sorter from a model. Entity names are taken in sorted
    /// order so ranks are stable across runs.
    #[tracing::instrument(skip_all)]
    pub fn new(model: &EntityModel) -> Self {
        let mut names: Vec<&str> = model.entity_names().collect();
        names.sort_unstable();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ((*name).to_string(), i))
            .collect();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        let mut add_edge = |from: usize, to: usize, adjacency: &mut Vec<Vec<usize>>| {
            if from != to && !adjacency[from].contains(&to) {
                adjacency[from].push(to);
            }
        };
        for (i, name) in names.iter().enumerate() {
            let Some(entity) = model.entity(name) else {
                continue;
            };
            for rel in &entity.relationships {
                if rel.is_flattened() || rel.target == entity.name {
                    continue;
                }
                let Some(&j) = index.get(rel.target) else {
                    continue;
                };
                if rel.to_many && rel.to_dependent_pk {
                    // Master first: target's key comes from this entity.
                    add_edge(i, j, &mut adjacency);
                }
                if !rel.to_many {
                    let feeds_own_pk = rel.joins.iter().any(|join| {
                        entity
                            .attribute_for_column(join.source_column)
                            .is_some_and(|a| a.primary_key)
                    });
                    if rel.to_dependent_pk || feeds_own_pk {
                        // This entity is the dependent; its master first.
                        add_edge(j, i, &mut adjacency);
                    }
                }
            }
        }

        let component = strongly_connected_components(&adjacency);
        let rank = component_ranks(&adjacency, &component);
        let rank = (0..names.len()).map(|i| rank[component[i]]).collect();
        Self { index, rank }
    }

    /// Topological rank of one entity. Entities in the same strongly
    /// connected component share a rank.
    pub fn rank(&self, entity: &str) -> Option<usize> {
        self.index.get(entity).map(|&i| self.rank[i])
    }

    /// Order entity names for writing. Insert order puts masters first;
    /// delete order is its exact reverse. Relative order of same-rank
    /// entities is preserved from the input, and names absent from the
    /// model sort after every ranked entity in either direction. Never
    /// fails: cyclic entity dependencies were contracted at
    /// construction.
    pub fn sort_entity_names(&self, names: &mut [String], for_delete: bool) {
        names.sort_by_key(|name| {
            self.rank(name).map_or(usize::MAX, |rank| {
                if for_delete {
                    usize::MAX - 1 - rank
                } else {
                    rank
                }
            })
        });
    }
}

/// Tarjan's algorithm; returns the component index per node.
fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<usize> {
    struct Walk<'a> {
        adjacency: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        component: Vec<usize>,
        components: usize,
    }

    impl Walk<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next_index);
            self.low[v] = self.next_index;
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &w in &self.adjacency[v] {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.low[v] = self.low[v].min(self.low[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.low[v] = self.low[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if self.low[v] == self.index[v].unwrap_or(usize::MAX) {
                loop {
                    let Some(w) = self.stack.pop() else { break };
                    self.on_stack[w] = false;
                    self.component[w] = self.components;
                    if w == v {
                        break;
                    }
                }
                self.components += 1;
            }
        }
    }

    let n = adjacency.len();
    let mut walk = Walk {
        adjacency,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        component: vec![0; n],
        components: 0,
    };
    for v in 0..n {
        if walk.index[v].is_none() {
            walk.visit(v);
        }
    }
    walk.component
}

/// Kahn's algorithm over the condensed graph; returns a topological
/// rank per component, deterministic by smallest member node index.
fn component_ranks(adjacency: &[Vec<usize>], component: &[usize]) -> Vec<usize> {
    let count = component.iter().copied().max().map_or(0, |m| m + 1);
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut in_degree = vec![0usize; count];
    for (v, targets) in adjacency.iter().enumerate() {
        for &w in targets {
            let (cv, cw) = (component[v], component[w]);
            if cv != cw && !edges[cv].contains(&cw) {
                edges[cv].push(cw);
                in_degree[cw] += 1;
            }
        }
    }
    let mut first_member = vec![usize::MAX; count];
    for (v, &c) in component.iter().enumerate() {
        first_member[c] = first_member[c].min(v);
    }

    let mut ready: Vec<usize> = (0..count).filter(|&c| in_degree[c] == 0).collect();
    let mut rank = vec![0usize; count];
    let mut next_rank = 0;
    while !ready.is_empty() {
        let pick = ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &c)| first_member[c])
            .map_or(0, |(i, _)| i);
        let c = ready.swap_remove(pick);
        rank[c] = next_rank;
        next_rank += 1;
        for &w in &edges[c] {
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                ready.push(w);
            }
        }
    }
    rank
}

/// Order instances of one entity along its reflexive to-one
/// relationships: an instance's target (e.g. an employee's manager)
/// writes before the instance on insert, after it on delete.
///
/// Fails with a reflexive-cycle error when the instances cannot be
/// linearized, including an instance targeting itself. Entities with no
/// reflexive relationship keep the input order untouched.
pub fn sort_objects(
    store: &ObjectStore,
    entity: &Entity,
    ids: &mut Vec<ObjectId>,
    for_delete: bool,
) -> Result<()> {
    let reflexive: Vec<&str> = entity
        .reflexive_relationships()
        .filter(|r| !r.to_many)
        .map(|r| r.name)
        .collect();
    if reflexive.is_empty() {
        return Ok(());
    }

    let position: HashMap<&ObjectId, usize> =
        ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
    let n = ids.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, id) in ids.iter().enumerate() {
        let Some(object) = store.object(id) else {
            continue;
        };
        for rel in &reflexive {
            let Some(target) = object.to_one_target(rel) else {
                continue;
            };
            if let Some(&t) = position.get(target) {
                // Self-reference is an immediate cycle.
                if t == i {
                    return Err(ValidationError::ReflexiveCycle {
                        entity: entity.name.to_string(),
                    }
                    .into());
                }
                dependents[t].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);
    while !ready.is_empty() {
        // Smallest input position first, for deterministic output.
        let pick = ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &i)| i)
            .map_or(0, |(i, _)| i);
        let v = ready.swap_remove(pick);
        sorted.push(v);
        for &w in &dependents[v] {
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                ready.push(w);
            }
        }
    }
    if sorted.len() < n {
        return Err(ValidationError::ReflexiveCycle {
            entity: entity.name.to_string(),
        }
        .into());
    }
    if for_delete {
        sorted.reverse();
    }
    let reordered: Vec<ObjectId> = sorted.into_iter().map(|i| ids[i].clone()).collect();
    *ids = reordered;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::{Attribute, Join, Relationship};

    fn model() -> EntityModel {
        let mut model = EntityModel::new();
        model.add(
            Entity::new("Order", "orders")
                .attribute(Attribute::new("id", "id").primary_key(true).generated(true))
                .relationship(
                    Relationship::to_many("lineItems", "LineItem", vec![Join::new("id", "order_id")])
                        .to_dependent_pk(true),
                ),
        );
        model.add(
            Entity::new("LineItem", "line_items")
                .attribute(Attribute::new("order_id", "order_id").primary_key(true))
                .attribute(Attribute::new("seq", "seq").primary_key(true))
                .relationship(Relationship::to_one(
                    "order",
                    "Order",
                    vec![Join::new("order_id", "id")],
                )),
        );
        model.add(
            Entity::new("Customer", "customers")
                .attribute(Attribute::new("id", "id").primary_key(true).generated(true))
                .relationship(
                    Relationship::to_many("orders", "Order", vec![Join::new("id", "customer_id")])
                        .to_dependent_pk(true),
                ),
        );
        model
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_insert_order_puts_masters_first() {
        let sorter = EntitySorter::new(&model());
        let mut entities = names(&["LineItem", "Customer", "Order"]);
        sorter.sort_entity_names(&mut entities, false);
        assert_eq!(entities, names(&["Customer", "Order", "LineItem"]));
    }

    #[test]
    fn test_delete_order_is_reverse_of_insert_order() {
        let sorter = EntitySorter::new(&model());
        let mut entities = names(&["Customer", "Order", "LineItem"]);
        sorter.sort_entity_names(&mut entities, true);
        assert_eq!(entities, names(&["LineItem", "Order", "Customer"]));
    }

    #[test]
    fn test_unmapped_entity_sorts_last_in_both_directions() {
        let sorter = EntitySorter::new(&model());
        let mut entities = names(&["Ghost", "LineItem", "Order"]);
        sorter.sort_entity_names(&mut entities, false);
        assert_eq!(entities, names(&["Order", "LineItem", "Ghost"]));

        let mut entities = names(&["Ghost", "Order", "LineItem"]);
        sorter.sort_entity_names(&mut entities, true);
        assert_eq!(entities, names(&["LineItem", "Order", "Ghost"]));
    }

    #[test]
    fn test_entity_cycle_is_contracted_not_fatal() {
        let mut model = EntityModel::new();
        // A and B each feed the other's primary key: a legal cycle.
        model.add(
            Entity::new("A", "a")
                .attribute(Attribute::new("b_id", "b_id").primary_key(true))
                .relationship(Relationship::to_one("b", "B", vec![Join::new("b_id", "id")])),
        );
        model.add(
            Entity::new("B", "b")
                .attribute(Attribute::new("a_id", "a_id").primary_key(true))
                .relationship(Relationship::to_one("a", "A", vec![Join::new("a_id", "id")])),
        );
        model.add(
            Entity::new("C", "c")
                .attribute(Attribute::new("a_id", "a_id").primary_key(true))
                .relationship(Relationship::to_one("a", "A", vec![Join::new("a_id", "id")])),
        );

        let sorter = EntitySorter::new(&model);
        assert_eq!(sorter.rank("A"), sorter.rank("B"));
        let mut entities = names(&["C", "B", "A"]);
        sorter.sort_entity_names(&mut entities, false);
        // The contracted {A, B} component precedes its dependent C,
        // keeping input order inside the component.
        assert_eq!(entities, names(&["B", "A", "C"]));
    }

    fn employee_entity() -> Entity {
        Entity::new("Employee", "employees")
            .attribute(Attribute::new("id", "id").primary_key(true).generated(true))
            .relationship(Relationship::to_one(
                "manager",
                "Employee",
                vec![Join::new("manager_id", "id")],
            ))
    }

    #[test]
    fn test_reflexive_chain_sorts_managers_first() {
        let entity = employee_entity();
        let mut store = ObjectStore::new();
        let e1 = store.register_new("Employee", []);
        let e2 = store.register_new("Employee", []);
        let e3 = store.register_new("Employee", []);
        // e3 reports to e2, e2 reports to e1.
        store.set_to_one(&e3, "manager", Some(e2.clone())).unwrap();
        store.set_to_one(&e2, "manager", Some(e1.clone())).unwrap();

        let mut ids = vec![e3.clone(), e1.clone(), e2.clone()];
        sort_objects(&store, &entity, &mut ids, false).unwrap();
        assert_eq!(ids, vec![e1.clone(), e2.clone(), e3.clone()]);

        let mut ids = vec![e3.clone(), e1.clone(), e2.clone()];
        sort_objects(&store, &entity, &mut ids, true).unwrap();
        assert_eq!(ids, vec![e3, e2, e1]);
    }

    #[test]
    fn test_reflexive_cycle_is_fatal() {
        let entity = employee_entity();
        let mut store = ObjectStore::new();
        let a = store.register_new("Employee", []);
        let b = store.register_new("Employee", []);
        store.set_to_one(&a, "manager", Some(b.clone())).unwrap();
        store.set_to_one(&b, "manager", Some(a.clone())).unwrap();

        let mut ids = vec![a, b];
        let err = sort_objects(&store, &entity, &mut ids, false).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_reference_is_fatal() {
        let entity = employee_entity();
        let mut store = ObjectStore::new();
        let a = store.register_new("Employee", []);
        store.set_to_one(&a, "manager", Some(a.clone())).unwrap();

        let mut ids = vec![a];
        assert!(sort_objects(&store, &entity, &mut ids, false).is_err());
    }

    #[test]
    fn test_no_reflexive_relationship_keeps_input_order() {
        let entity = Entity::new("Order", "orders")
            .attribute(Attribute::new("id", "id").primary_key(true));
        let mut store = ObjectStore::new();
        let a = store.register_new("Order", []);
        let b = store.register_new("Order", []);
        let mut ids = vec![b.clone(), a.clone()];
        sort_objects(&store, &entity, &mut ids, false).unwrap();
        assert_eq!(ids, vec![b, a]);
    }
}
