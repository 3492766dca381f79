use std::collections::{HashMap, HashSet};

use crate::error::ExecutorError;
use crate::store::{Priority, TaskRecord};

use super::manifest::TaskDefinition;

/// Anything that can be placed in a dependency graph, keyed by name.
pub trait TaskLike: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
    fn priority(&self) -> Priority;
}

impl TaskLike for TaskDefinition {
    fn id(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

impl TaskLike for TaskRecord {
    fn id(&self) -> &str {
        self.display_name()
    }

    fn dependencies(&self) -> &[String] {
        &self.spec.dependencies
    }

    fn priority(&self) -> Priority {
        self.spec.priority
    }
}

/// Task dependency graph (DAG)
#[derive(Debug, Clone)]
pub struct TaskGraph<T: TaskLike> {
    /// Task nodes: name -> task
    pub nodes: HashMap<String, T>,

    /// Dependency edges: name -> names it depends on
    pub edges: HashMap<String, Vec<String>>,

    /// Reverse edges: name -> names that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,

    /// Declaration order, used as the final tie-break
    insertion_order: Vec<String>,
    position: HashMap<String, usize>,
}

impl<T: TaskLike> TaskGraph<T> {
    /// Construct task graph from task list
    pub fn from_tasks(tasks: &[T]) -> Result<Self, ExecutorError> {
        let mut nodes = HashMap::new();
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut insertion_order = Vec::new();
        let mut position = HashMap::new();

        for task in tasks {
            if nodes.contains_key(task.id()) {
                return Err(ExecutorError::DuplicateId(task.id().to_string()));
            }

            let name = task.id().to_string();
            let mut seen = HashSet::new();
            let dependencies: Vec<String> = task
                .dependencies()
                .iter()
                .filter(|d| seen.insert(d.as_str()))
                .cloned()
                .collect();

            for dep in &dependencies {
                reverse_edges.entry(dep.clone()).or_default().push(name.clone());
            }

            position.insert(name.clone(), insertion_order.len());
            nodes.insert(name.clone(), task.clone());
            edges.insert(name.clone(), dependencies);
            insertion_order.push(name);
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
            insertion_order,
            position,
        })
    }

    /// Checks references and acyclicity, returning the tiers on success.
    pub fn validate(&self) -> Result<Vec<Vec<String>>, ExecutorError> {
        for name in &self.insertion_order {
            for dep in &self.edges[name] {
                if !self.nodes.contains_key(dep) {
                    return Err(ExecutorError::UnknownDependency {
                        task: name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        self.tiers()
    }

    pub fn len(&self) -> usize {
        self.insertion_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insertion_order.is_empty()
    }

    pub fn order(&self) -> &[String] {
        &self.insertion_order
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn position(&self, name: &str) -> usize {
        self.position.get(name).copied().unwrap_or(usize::MAX)
    }

    /// `(priority rank, declaration position)`.
    pub fn dispatch_key(&self, name: &str) -> (u8, usize) {
        let rank = self
            .nodes
            .get(name)
            .map(|t| t.priority().rank())
            .unwrap_or(u8::MAX);
        (rank, self.position(name))
    }

    /// Kahn layering: tier N holds the nodes whose dependencies all sit in tiers < N.
    ///
    /// Each tier is ordered by priority, then declaration order. Dependencies
    /// must already be known to exist.
    pub fn tiers(&self) -> Result<Vec<Vec<String>>, ExecutorError> {
        let mut in_degree: HashMap<&str, usize> = self
            .insertion_order
            .iter()
            .map(|name| (name.as_str(), self.edges[name].len()))
            .collect();

        let mut tiers: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = self
            .insertion_order
            .iter()
            .filter(|name| in_degree[name.as_str()] == 0)
            .cloned()
            .collect();
        let mut processed = 0;

        while !current.is_empty() {
            current.sort_by_key(|name| self.dispatch_key(name));
            processed += current.len();

            let mut next = Vec::new();
            for name in &current {
                for dependent in self.reverse_edges.get(name).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            tiers.push(std::mem::replace(&mut current, next));
        }

        if processed != self.len() {
            let peeled: HashSet<&str> = tiers.iter().flatten().map(String::as_str).collect();
            let cycle = self
                .find_cycle(&peeled)
                .unwrap_or_else(|| vec!["<unresolved>".to_string()]);
            return Err(ExecutorError::CyclicDependency(cycle));
        }

        Ok(tiers)
    }

    /// DFS over the nodes Kahn could not peel; returns `a -> b -> a` style paths.
    fn find_cycle(&self, peeled: &HashSet<&str>) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in &self.insertion_order {
            if peeled.contains(name.as_str()) || visited.contains(name) {
                continue;
            }
            if self.dfs_cycle(name, peeled, &mut visited, &mut stack) {
                return Some(stack);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        peeled: &HashSet<&str>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> bool {
        visited.insert(node.to_string());
        stack.push(node.to_string());

        for dep in self.dependencies_of(node) {
            if peeled.contains(dep.as_str()) {
                continue;
            }
            if let Some(pos) = stack.iter().position(|x| x == dep) {
                stack.push(dep.clone());
                *stack = stack[pos..].to_vec();
                return true;
            }
            if !visited.contains(dep) && self.dfs_cycle(dep, peeled, visited, stack) {
                return true;
            }
        }

        stack.pop();
        false
    }
}

/// Validates a batch and returns its execution tiers.
pub fn resolve(tasks: &[TaskDefinition]) -> Result<Vec<Vec<String>>, ExecutorError> {
    TaskGraph::from_tasks(tasks)?.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerKind;
    use pretty_assertions::assert_eq;

    fn task(name: &str, deps: &[&str]) -> TaskDefinition {
        let mut t = TaskDefinition::new(name, WorkerKind::Codex, "p");
        t.dependencies = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    fn with_priority(mut t: TaskDefinition, p: Priority) -> TaskDefinition {
        t.priority = p;
        t
    }

    #[test]
    fn layers_diamond_into_tiers() {
        let tiers = resolve(&[
            task("d", &["b", "c"]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("a", &[]),
        ])
        .unwrap();
        assert_eq!(
            tiers,
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn priority_orders_within_a_tier_only() {
        let tiers = resolve(&[
            with_priority(task("low", &[]), Priority::P3),
            with_priority(task("high", &[]), Priority::P0),
            with_priority(task("after", &["low"]), Priority::P0),
        ])
        .unwrap();
        assert_eq!(tiers[0], vec!["high".to_string(), "low".to_string()]);
        assert_eq!(tiers[1], vec!["after".to_string()]);
    }

    #[test]
    fn reports_the_cycle_path() {
        let err = resolve(&[task("ok", &[]), task("a", &["b"]), task("b", &["c"]), task("c", &["a"])])
            .unwrap_err();
        match err {
            ExecutorError::CyclicDependency(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
                assert!(!path.contains(&"ok".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = resolve(&[task("a", &["a"])]).unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::CyclicDependency(path) if path == vec!["a".to_string(), "a".to_string()]
        ));
    }

    #[test]
    fn unknown_dependency_and_duplicates() {
        assert!(matches!(
            resolve(&[task("a", &["ghost"])]),
            Err(ExecutorError::UnknownDependency { task, missing }) if task == "a" && missing == "ghost"
        ));
        assert!(matches!(
            resolve(&[task("a", &[]), task("a", &[])]),
            Err(ExecutorError::DuplicateId(name)) if name == "a"
        ));
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let tiers = resolve(&[task("a", &[]), task("b", &["a", "a"])]).unwrap();
        assert_eq!(tiers.len(), 2);
    }
}
