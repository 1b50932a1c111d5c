use crate::specs::spec::{InstanceSpec, LinkableSpec};

/// One output column of a data set and the spec it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub spec: InstanceSpec,
    pub column_name: String,
}

/// The columns a converted node exposes, in select order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSet {
    instances: Vec<Instance>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance unless its spec is already present.
    pub fn push(&mut self, instance: Instance) -> bool {
        if self.contains(&instance.spec) {
            return false;
        }
        self.instances.push(instance);
        true
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, spec: &InstanceSpec) -> bool {
        self.get(spec).is_some()
    }

    pub fn get(&self, spec: &InstanceSpec) -> Option<&Instance> {
        self.instances.iter().find(|i| &i.spec == spec)
    }

    pub fn linkable(&self) -> impl Iterator<Item = (&LinkableSpec, &Instance)> {
        self.instances
            .iter()
            .filter_map(|i| i.spec.as_linkable().map(|spec| (spec, i)))
    }

    pub fn specs(&self) -> impl Iterator<Item = &InstanceSpec> {
        self.instances.iter().map(|i| &i.spec)
    }
}
