//! Product selection.
//!
//! Given the parsed root module and an optional set of dotted product
//! designators, enumerates the product instances the driver should visit.
//! Without designators, every product marked `!` (public default) in the
//! root module is selected.

use crate::builtins::Builtins;
use crate::error::{Error, Result};
use crate::model::{DeclId, DeclKind, InstId, Type, Value, Visibility, World};

/// Whether a declaration is a variable whose type is `Product` or a
/// subclass of it.
fn is_product_var(world: &World, builtins: &Builtins, decl: DeclId) -> bool {
    match &world.decl(decl).kind {
        DeclKind::Var(v) => match &v.ty {
            Some(Type::Class(c)) => world.is_subclass(*c, builtins.product),
            _ => false,
        },
        _ => false,
    }
}

/// The instance bound to a product variable, looked up through its owning
/// scope's instance.
fn inst_of_decl(world: &World, decl: DeclId) -> Option<InstId> {
    let owner = world.decl(decl).owner?;
    let scope_inst = world.scope_inst(owner)?;
    match world.inst(scope_inst).get(&world.decl(decl).name) {
        Some(Value::Inst(i)) => Some(*i),
        _ => None,
    }
}

/// Resolves one dotted designator against the root module, enforcing
/// public transit through submodules.
fn resolve_designator(world: &World, root: DeclId, desig: &str) -> Result<DeclId> {
    let mut module = root;
    let mut consumed: Vec<&str> = Vec::new();
    let mut segments = desig.split('.').peekable();
    let mut decl = None;
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return Err(Error::plain(format!("the passed-in product designator has invalid syntax: {desig}")));
        }
        if !consumed.is_empty() {
            let prev = world.decl(module);
            if !matches!(prev.kind, DeclKind::Module(_)) {
                return Err(Error::plain(format!(
                    "'{}' of passed-in designator '{desig}' must be a subdir declaration",
                    consumed.join(".")
                )));
            }
            if prev.visi != Visibility::Public {
                return Err(Error::plain(format!(
                    "subdir '{}' of passed-in designator '{desig}' is not public",
                    consumed.join(".")
                )));
            }
        }
        let Some(found) = world.scope_get(module, segment) else {
            return Err(Error::plain(format!(
                "identifier '{segment}' of passed-in designator '{desig}' not found"
            )));
        };
        consumed.push(segment);
        if segments.peek().is_some() {
            module = found;
        }
        decl = Some(found);
    }
    decl.ok_or_else(|| Error::plain(format!("the passed-in product designator has invalid syntax: {desig}")))
}

/// Enumerates the product instances to build. `designators == None` picks
/// the root module's default (`!`) products.
pub fn find_products(
    world: &World,
    builtins: &Builtins,
    root: DeclId,
    designators: Option<&[String]>,
) -> Result<Vec<InstId>> {
    let mut selected = Vec::new();
    match designators {
        None => {
            let order = match &world.decl(root).kind {
                DeclKind::Module(m) => m.order.clone(),
                _ => return Err(Error::plain("expecting a module definition")),
            };
            for decl in order {
                if is_product_var(world, builtins, decl)
                    && world.decl(decl).visi == Visibility::PublicDefault
                {
                    if let Some(inst) = inst_of_decl(world, decl) {
                        selected.push(inst);
                    }
                }
            }
            if selected.is_empty() {
                return Err(Error::plain("the module doesn't have any default product declarations"));
            }
        }
        Some(designators) => {
            for desig in designators {
                let decl = resolve_designator(world, root, desig)?;
                if !is_product_var(world, builtins, decl) {
                    return Err(Error::plain(format!("no valid product declaration: {desig}")));
                }
                if world.decl(decl).visi < Visibility::Public {
                    return Err(Error::plain(format!("the declaration is not visible from outside: {desig}")));
                }
                let Some(inst) = inst_of_decl(world, decl) else {
                    return Err(Error::plain(format!("no valid product declaration: {desig}")));
                };
                selected.push(inst);
            }
        }
    }
    Ok(selected)
}
