//! Ability gate on top of the resolver.
//!
//! Evaluation order for `check`:
//! 1. superadmin predicate (allow on true)
//! 2. before-hooks in registration order; the first `Some(_)` decides
//! 3. the rule registered for the ability, else the resolver:
//!    `has_resource_action` when a target is given, `has_action` otherwise
//!
//! Rules registered with `define_with` also receive a typed argument passed
//! through `check_with`. A missing or mistyped argument is a denial.
//! 4. after-hooks observe the response; they cannot change it
//!
//! A gate is plain configuration built once and borrowed by callers. Nothing
//! here is global, so tests build a fresh gate per case.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::db::Store;
use crate::error::{Error, Result};

pub type PrincipalId = u64;

pub const DEFAULT_DENIAL: &str = "This action is unauthorized.";

/// Resource instance an ability is checked against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub resource_type: String,
    pub resource_id: String,
}

impl Target {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Target { resource_type: resource_type.into(), resource_id: resource_id.into() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// Structured gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    granted: bool,
    reason: Option<String>,
}

impl Response {
    pub fn allow() -> Self {
        Response { granted: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Response { granted: false, reason: Some(reason.into()) }
    }

    pub fn granted(&self) -> bool {
        self.granted
    }

    pub fn denied(&self) -> bool {
        !self.granted
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// `Ok(self)` when granted, otherwise `AuthorizationDenied` with the reason
    pub fn authorize(self) -> Result<Response> {
        if self.granted {
            Ok(self)
        } else {
            Err(Error::AuthorizationDenied(self.reason.unwrap_or_else(|| DEFAULT_DENIAL.to_string())))
        }
    }
}

impl From<bool> for Response {
    fn from(granted: bool) -> Self {
        if granted {
            Response::allow()
        } else {
            Response::deny(DEFAULT_DENIAL)
        }
    }
}

/// Outcome of `any` / `all`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    pub granted: bool,
    pub results: Vec<(String, Response)>,
}

impl Combined {
    pub fn denied(&self) -> Vec<&str> {
        self.results.iter().filter(|(_, r)| r.denied()).map(|(a, _)| a.as_str()).collect()
    }
}

type Rule = Box<dyn Fn(&Store, PrincipalId, Option<&Target>, Option<&dyn Any>) -> Result<Response> + Send + Sync>;
type BeforeHook = Box<dyn Fn(Option<PrincipalId>, &str, Option<&Target>) -> Option<bool> + Send + Sync>;
type AfterHook = Box<dyn Fn(Option<PrincipalId>, &str, Option<&Target>, &Response) + Send + Sync>;
type Superadmin = Box<dyn Fn(&Store, PrincipalId) -> Result<bool> + Send + Sync>;

pub struct Gate<'s> {
    store: &'s Store,
    rules: HashMap<String, Rule>,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    superadmin: Option<Superadmin>,
}

impl<'s> Gate<'s> {
    pub fn new(store: &'s Store) -> Self {
        Gate { store, rules: HashMap::new(), before: Vec::new(), after: Vec::new(), superadmin: None }
    }

    /// Register or replace the rule for `ability`
    pub fn define<F>(&mut self, ability: impl Into<String>, rule: F) -> &mut Self
    where
        F: Fn(&Store, PrincipalId, Option<&Target>) -> Result<Response> + Send + Sync + 'static,
    {
        self.rules.insert(
            ability.into(),
            Box::new(move |s: &Store, p: PrincipalId, t: Option<&Target>, _: Option<&dyn Any>| rule(s, p, t)),
        );
        self
    }

    /// Register a rule that needs an argument of type `T`, e.g. the record being edited
    pub fn define_with<T, F>(&mut self, ability: impl Into<String>, rule: F) -> &mut Self
    where
        T: Any,
        F: Fn(&Store, PrincipalId, Option<&Target>, &T) -> Result<Response> + Send + Sync + 'static,
    {
        let ability = ability.into();
        let missing = format!("ability '{}' needs a {} argument", ability, type_name::<T>());
        self.rules.insert(
            ability,
            Box::new(move |s: &Store, p: PrincipalId, t: Option<&Target>, arg: Option<&dyn Any>| {
                match arg.and_then(|a| a.downcast_ref::<T>()) {
                    Some(value) => rule(s, p, t, value),
                    None => Ok(Response::deny(missing.as_str())),
                }
            }),
        );
        self
    }

    pub fn before<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Option<PrincipalId>, &str, Option<&Target>) -> Option<bool> + Send + Sync + 'static,
    {
        self.before.push(Box::new(hook));
        self
    }

    pub fn after<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Option<PrincipalId>, &str, Option<&Target>, &Response) + Send + Sync + 'static,
    {
        self.after.push(Box::new(hook));
        self
    }

    /// Principals for which every check is allowed before any hook runs
    pub fn superadmin<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Store, PrincipalId) -> Result<bool> + Send + Sync + 'static,
    {
        self.superadmin = Some(Box::new(predicate));
        self
    }

    pub fn has(&self, ability: &str) -> bool {
        self.rules.contains_key(ability)
    }

    pub fn abilities(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    fn decide(
        &self,
        ability: &str,
        target: Option<&Target>,
        arg: Option<&dyn Any>,
        principal: Option<PrincipalId>,
    ) -> Result<Response> {
        if let (Some(p), Some(pred)) = (principal, &self.superadmin) {
            if pred(self.store, p)? {
                return Ok(Response::allow());
            }
        }
        for hook in &self.before {
            if let Some(decision) = hook(principal, ability, target) {
                return Ok(decision.into());
            }
        }
        let p = principal.ok_or(Error::Unauthenticated)?;
        if let Some(rule) = self.rules.get(ability) {
            return rule(self.store, p, target, arg);
        }
        let held = match target {
            Some(t) => self.store.has_resource_action(p, &t.resource_type, &t.resource_id, ability)?,
            None => self.store.has_action(p, ability)?,
        };
        Ok(if held {
            Response::allow()
        } else {
            match target {
                Some(t) => Response::deny(format!("missing permission '{}' on {}", ability, t)),
                None => Response::deny(format!("missing permission '{}'", ability)),
            }
        })
    }

    fn run(
        &self,
        ability: &str,
        target: Option<&Target>,
        arg: Option<&dyn Any>,
        principal: Option<PrincipalId>,
    ) -> Result<Response> {
        let response = self.decide(ability, target, arg, principal)?;
        for hook in &self.after {
            hook(principal, ability, target, &response);
        }
        trace!(ability, ?principal, granted = response.granted(), "gate check");
        Ok(response)
    }

    /// Structured check
    pub fn check(&self, ability: &str, target: Option<&Target>, principal: Option<PrincipalId>) -> Result<Response> {
        self.run(ability, target, None, principal)
    }

    /// `check` with an argument for rules registered through `define_with`
    pub fn check_with(
        &self,
        ability: &str,
        target: Option<&Target>,
        arg: &dyn Any,
        principal: Option<PrincipalId>,
    ) -> Result<Response> {
        self.run(ability, target, Some(arg), principal)
    }

    pub fn allows_with(
        &self,
        ability: &str,
        target: Option<&Target>,
        arg: &dyn Any,
        principal: Option<PrincipalId>,
    ) -> Result<bool> {
        self.check_with(ability, target, arg, principal).map(|r| r.granted())
    }

    pub fn authorize_with(
        &self,
        ability: &str,
        target: Option<&Target>,
        arg: &dyn Any,
        principal: Option<PrincipalId>,
    ) -> Result<Response> {
        self.check_with(ability, target, arg, principal)?.authorize()
    }

    /// Boolean check
    pub fn allows(&self, ability: &str, target: Option<&Target>, principal: Option<PrincipalId>) -> Result<bool> {
        self.check(ability, target, principal).map(|r| r.granted())
    }

    pub fn denies(&self, ability: &str, target: Option<&Target>, principal: Option<PrincipalId>) -> Result<bool> {
        self.allows(ability, target, principal).map(|g| !g)
    }

    /// Like `check`, but a denial is returned as `Error::AuthorizationDenied`
    pub fn authorize(&self, ability: &str, target: Option<&Target>, principal: Option<PrincipalId>) -> Result<Response> {
        self.check(ability, target, principal)?.authorize()
    }

    fn each(&self, abilities: &[&str], target: Option<&Target>, principal: Option<PrincipalId>) -> Result<Vec<(String, Response)>> {
        abilities
            .iter()
            .map(|a| Ok((a.to_string(), self.check(a, target, principal)?)))
            .collect()
    }

    /// Granted if at least one ability is granted
    pub fn any(&self, abilities: &[&str], target: Option<&Target>, principal: Option<PrincipalId>) -> Result<Combined> {
        let results = self.each(abilities, target, principal)?;
        let granted = results.iter().any(|(_, r)| r.granted());
        Ok(Combined { granted, results })
    }

    /// Granted if every ability is granted
    pub fn all(&self, abilities: &[&str], target: Option<&Target>, principal: Option<PrincipalId>) -> Result<Combined> {
        let results = self.each(abilities, target, principal)?;
        let granted = results.iter().all(|(_, r)| r.granted());
        Ok(Combined { granted, results })
    }
}
