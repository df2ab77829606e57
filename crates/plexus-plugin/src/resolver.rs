//! Dependency resolution over plugin descriptors.
//!
//! Produces the initialization order with Kahn's algorithm. Plugins whose
//! required dependencies are absent, incompatible or themselves excluded are
//! reported with the reason and left out; everything else is still ordered.
//! Ties are broken by registration order, so the result is deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginDescriptor;

/// Output of [`DependencyResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Plugin names, every dependency before its dependents.
    pub order: Vec<String>,
    /// Plugins left out, with the reason.
    pub excluded: Vec<(String, PluginError)>,
}

impl Resolution {
    /// Returns whether `name` was excluded.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|(n, _)| n == name)
    }
}

/// Topological resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Orders `descriptors`, given in registration order.
    ///
    /// Fails only on a cycle, naming one concrete cycle.
    pub fn resolve(descriptors: &[Arc<PluginDescriptor>]) -> PluginResult<Resolution> {
        let index: HashMap<&str, usize> = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();

        let excluded = exclusions(descriptors, &index);
        let excluded_set: HashSet<usize> = excluded.iter().map(|(i, _)| *i).collect();

        // deps[i]: included dependencies of i that constrain its position.
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
        for (i, d) in descriptors.iter().enumerate() {
            if excluded_set.contains(&i) {
                continue;
            }
            for dep in &d.dependencies {
                match index.get(dep.name.as_str()) {
                    Some(&j) if !excluded_set.contains(&j) && dep.constraint.matches(&descriptors[j].version) => {
                        deps[i].push(j);
                    }
                    _ => debug!(plugin = %d.name, dependency = %dep.name, "Optional dependency edge dropped"),
                }
            }
        }

        let order = kahn(descriptors.len(), &deps, |i| !excluded_set.contains(&i));
        let included = descriptors.len() - excluded_set.len();
        if order.len() < included {
            let placed: HashSet<usize> = order.iter().copied().collect();
            let cycle = find_cycle(&deps, |i| !excluded_set.contains(&i) && !placed.contains(&i))
                .into_iter()
                .map(|i| descriptors[i].name.clone())
                .collect();
            return Err(PluginError::CyclicDependency { cycle });
        }

        Ok(Resolution {
            order: order.into_iter().map(|i| descriptors[i].name.clone()).collect(),
            excluded: excluded
                .into_iter()
                .map(|(i, err)| (descriptors[i].name.clone(), err))
                .collect(),
        })
    }

    /// Transitive required dependents of `name`, in dependency order.
    pub fn dependents_of(descriptors: &[Arc<PluginDescriptor>], name: &str) -> Vec<String> {
        let mut affected: HashSet<&str> = HashSet::from([name]);
        loop {
            let before = affected.len();
            for d in descriptors {
                if !affected.contains(d.name.as_str())
                    && d.required_dependencies().any(|dep| affected.contains(dep))
                {
                    affected.insert(d.name.as_str());
                }
            }
            if affected.len() == before {
                break;
            }
        }
        affected.remove(name);

        let index: HashMap<&str, usize> = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();
        let deps: Vec<Vec<usize>> = descriptors
            .iter()
            .map(|d| {
                d.required_dependencies()
                    .filter(|dep| affected.contains(dep))
                    .filter_map(|dep| index.get(dep).copied())
                    .collect()
            })
            .collect();
        let member = |i: usize| affected.contains(descriptors[i].name.as_str());

        let mut order = kahn(descriptors.len(), &deps, member);
        // A cycle cannot be ordered; keep its members in registration order.
        let placed: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..descriptors.len()).filter(|&i| member(i) && !placed.contains(&i)));
        order.into_iter().map(|i| descriptors[i].name.clone()).collect()
    }
}

/// Plugins that cannot be loaded, propagated to a fixed point.
fn exclusions(
    descriptors: &[Arc<PluginDescriptor>],
    index: &HashMap<&str, usize>,
) -> Vec<(usize, PluginError)> {
    let mut excluded: Vec<(usize, PluginError)> = Vec::new();
    let mut is_excluded = vec![false; descriptors.len()];

    loop {
        let mut changed = false;
        for (i, d) in descriptors.iter().enumerate() {
            if is_excluded[i] {
                continue;
            }
            let reason = d.dependencies.iter().filter(|dep| !dep.optional).find_map(|dep| {
                match index.get(dep.name.as_str()) {
                    None => Some(PluginError::MissingDependency {
                        plugin: d.name.clone(),
                        dependency: dep.name.clone(),
                    }),
                    Some(&j) if !dep.constraint.matches(&descriptors[j].version) => {
                        Some(PluginError::IncompatibleDependency {
                            plugin: d.name.clone(),
                            dependency: dep.name.clone(),
                            required: dep.constraint.to_string(),
                            found: descriptors[j].version.to_string(),
                        })
                    }
                    Some(&j) if is_excluded[j] => Some(PluginError::DependencyFailed {
                        plugin: d.name.clone(),
                        dependency: dep.name.clone(),
                    }),
                    Some(_) => None,
                }
            });
            if let Some(err) = reason {
                debug!(plugin = %d.name, reason = %err, "Plugin excluded from resolution");
                is_excluded[i] = true;
                excluded.push((i, err));
                changed = true;
            }
        }
        if !changed {
            return excluded;
        }
    }
}

/// Kahn's algorithm over the nodes accepted by `member`.
fn kahn(len: usize, deps: &[Vec<usize>], member: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut pending = vec![0usize; len];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); len];
    for i in (0..len).filter(|&i| member(i)) {
        for &j in deps[i].iter().filter(|&&j| member(j)) {
            pending[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..len).filter(|&i| member(i) && pending[i] == 0).collect();
    let mut order = Vec::with_capacity(len);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            pending[k] -= 1;
            if pending[k] == 0 {
                ready.insert(k);
            }
        }
    }
    order
}

/// Follows dependency edges among `leftover` nodes until one repeats.
///
/// Every node left after Kahn's algorithm has a leftover dependency, so the
/// walk always closes a cycle. The first node is repeated at the end.
fn find_cycle(deps: &[Vec<usize>], leftover: impl Fn(usize) -> bool) -> Vec<usize> {
    let Some(start) = (0..deps.len()).find(|&i| leftover(i)) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&j| leftover(j)) else {
            return path;
        };
        if let Some(&at) = seen.get(&next) {
            let mut cycle = path.split_off(at);
            cycle.push(next);
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependencySpec, PluginManifest};

    fn plugin(name: &str, version: &str, deps: Vec<DependencySpec>) -> Arc<PluginDescriptor> {
        Arc::new(
            PluginManifest {
                name: name.into(),
                version: version.into(),
                dependencies: deps,
                ..Default::default()
            }
            .into_descriptor()
            .expect("valid"),
        )
    }

    #[test]
    fn test_dependencies_first_ties_by_registration() {
        let ds = vec![
            plugin("c", "1.0.0", vec![DependencySpec::required("a", "*")]),
            plugin("b", "1.0.0", vec![]),
            plugin("a", "1.0.0", vec![]),
        ];
        let res = DependencyResolver::resolve(&ds).expect("acyclic");
        assert_eq!(res.order, vec!["b", "a", "c"]);
        assert!(res.excluded.is_empty());
    }

    #[test]
    fn test_cycle_is_named() {
        let ds = vec![
            plugin("solo", "1.0.0", vec![]),
            plugin("a", "1.0.0", vec![DependencySpec::required("b", "*")]),
            plugin("b", "1.0.0", vec![DependencySpec::required("a", "*")]),
        ];
        match DependencyResolver::resolve(&ds) {
            Err(PluginError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_excludes_only_its_chain() {
        let ds = vec![
            plugin("x", "1.0.0", vec![DependencySpec::required("ghost", "*")]),
            plugin("y", "1.0.0", vec![DependencySpec::required("x", "*")]),
            plugin("z", "1.0.0", vec![]),
        ];
        let res = DependencyResolver::resolve(&ds).expect("no cycle");
        assert_eq!(res.order, vec!["z"]);
        assert!(matches!(res.excluded[0].1, PluginError::MissingDependency { .. }));
        assert!(matches!(res.excluded[1].1, PluginError::DependencyFailed { .. }));
        assert!(res.is_excluded("y"));
    }

    #[test]
    fn test_optional_and_incompatible_dependencies() {
        let ds = vec![
            plugin("core", "1.4.0", vec![]),
            plugin("opt", "1.0.0", vec![
                DependencySpec::optional("absent", "*"),
                DependencySpec::optional("core", "^2"),
            ]),
            plugin("strict", "1.0.0", vec![DependencySpec::required("core", "^2")]),
        ];
        let res = DependencyResolver::resolve(&ds).expect("no cycle");
        assert_eq!(res.order, vec!["core", "opt"]);
        assert!(matches!(
            &res.excluded[0].1,
            PluginError::IncompatibleDependency { found, .. } if found == "1.4.0"
        ));
    }

    #[test]
    fn test_dependents_in_dependency_order() {
        let ds = vec![
            plugin("leaf", "1.0.0", vec![DependencySpec::required("mid", "*")]),
            plugin("root", "1.0.0", vec![]),
            plugin("mid", "1.0.0", vec![DependencySpec::required("root", "*")]),
            plugin("soft", "1.0.0", vec![DependencySpec::optional("root", "*")]),
        ];
        assert_eq!(DependencyResolver::dependents_of(&ds, "root"), vec!["mid", "leaf"]);
        assert!(DependencyResolver::dependents_of(&ds, "leaf").is_empty());
    }
}
