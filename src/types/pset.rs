//! Ordered, name-keyed parameter sets.
//!
//! A [`ParameterSet`] (pset) collects [`Param`] objects in insertion
//! order, tagged with the package and task that own it. Lookup is by
//! exact name or by glob pattern; pattern selection returns either a
//! `(name, value)` listing or a new set carrying the same provenance,
//! which is how an application collects all same-named parameters (for
//! example every `"msg"` parameter) out of a streamed task result.
//!
//! Names are unique when the set is built through [`add_param`]; sets
//! assembled from a result stream may legitimately repeat a name, in
//! which case exact-name lookup returns the first match.
//!
//! [`add_param`]: ParameterSet::add_param

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::{Param, ParamKind, ParamValue};

/// An ordered collection of uniquely-named parameters with provenance.
///
/// # Examples
///
/// ```
/// use votask::{ParamKind, ParameterSet};
///
/// let mut pset = ParameterSet::new("inputs");
/// pset.add_param("searchTerm", ParamKind::String, "registry search term")
///     .unwrap()
///     .set_value("quasar")
///     .unwrap();
///
/// let names: Vec<_> = pset.iter().map(|p| p.name()).collect();
/// assert_eq!(names, ["searchTerm"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<Param>,
}

impl ParameterSet {
    /// Creates an empty set with no provenance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates an empty set owned by the given package task.
    pub fn for_task(
        name: impl Into<String>,
        package: impl Into<String>,
        task: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            package: Some(package.into()),
            task: Some(task.into()),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// The set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning package name, if any.
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// The owning task name, if any.
    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    /// The set description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stamps the owning package/task provenance on this set.
    pub(crate) fn set_provenance(&mut self, package: impl Into<String>, task: impl Into<String>) {
        self.package = Some(package.into());
        self.task = Some(task.into());
    }

    /// Renames the set; used when adopting a template with no name.
    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Number of parameters in the set.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Whether a parameter with this exact name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name() == name)
    }

    /// Iterates the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Adds a new parameter with the given attributes.
    ///
    /// Returns a mutable handle so the caller can set the value or
    /// encoding in one chain.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateName`] if a parameter with this name already
    /// exists in the set.
    pub fn add_param(
        &mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Result<&mut Param> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateName { name });
        }
        self.params.push(Param::new(name, kind, description));
        Ok(self.params.last_mut().expect("just pushed"))
    }

    /// Adds an already-built parameter, rejecting duplicate names.
    pub fn add(&mut self, param: Param) -> Result<()> {
        if self.contains(param.name()) {
            return Err(Error::DuplicateName {
                name: param.name().to_string(),
            });
        }
        self.params.push(param);
        Ok(())
    }

    /// Appends a parameter without the duplicate-name check.
    ///
    /// Result streams may carry several parameters under one name
    /// (e.g. repeated `result` records); this is how those sets are
    /// assembled.
    pub(crate) fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    /// Deletes the first parameter with the given name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no parameter has this name.
    pub fn del_param(&mut self, name: &str) -> Result<Param> {
        match self.params.iter().position(|p| p.name() == name) {
            Some(idx) => Ok(self.params.remove(idx)),
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Gets the parameter with the given name. If duplicates are
    /// present the first match wins.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no parameter has this name.
    pub fn get_param(&self, name: &str) -> Result<&Param> {
        self.params
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Mutable access to the first parameter with the given name.
    pub fn get_param_mut(&mut self, name: &str) -> Result<&mut Param> {
        self.params
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Lists `(name, value)` pairs for parameters whose name matches
    /// the glob `pattern`, in insertion order. A `None` or empty
    /// pattern matches everything.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] if the pattern is not a valid glob.
    pub fn param_list(&self, pattern: Option<&str>) -> Result<Vec<(&str, Option<&ParamValue>)>> {
        let matcher = compile_pattern(pattern)?;
        Ok(self
            .params
            .iter()
            .filter(|p| matches(&matcher, p.name()))
            .map(|p| (p.name(), p.value()))
            .collect())
    }

    /// Builds a new set from the parameters whose name matches the
    /// glob `pattern`, preserving order and carrying this set's
    /// package/task provenance. A `None` or empty pattern selects
    /// everything.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] if the pattern is not a valid glob.
    pub fn param_set(&self, pattern: Option<&str>) -> Result<ParameterSet> {
        let matcher = compile_pattern(pattern)?;
        let params = self
            .params
            .iter()
            .filter(|p| matches(&matcher, p.name()))
            .cloned()
            .collect();
        Ok(Self {
            name: self.name.clone(),
            package: self.package.clone(),
            task: self.task.clone(),
            description: self.description.clone(),
            params,
        })
    }

    /// Checks every stored value against its declared kind.
    pub(crate) fn validate(&self) -> Result<()> {
        for param in &self.params {
            param.validate()?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// Compiles an optional glob pattern; `None`/empty means match-all.
fn compile_pattern(pattern: Option<&str>) -> Result<Option<Pattern>> {
    match pattern {
        None | Some("") => Ok(None),
        Some(p) => Pattern::new(p)
            .map(Some)
            .map_err(|e| Error::invalid_pattern(p, &e)),
    }
}

fn matches(matcher: &Option<Pattern>, name: &str) -> bool {
    matcher.as_ref().map_or(true, |m| m.matches(name))
}
