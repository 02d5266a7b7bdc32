//! Copy-set construction: where every cached file goes and which commands
//! put it there.
//!
//! # Design
//! - Pure functions over the request and the destination layout; nothing is
//!   dispatched until the whole plan has been built, so a bad path aborts the
//!   attempt without side effects.
//! - The call root is a location, not a file: it is mapped to the destination
//!   root and never copied.

use std::collections::BTreeMap;

use callcache_core::{
    CALL_ROOT_KEY, CommandSet, CopyError, CopyOutputsCommand, CopyResult, DestinationLayout,
    DestinationPlan, IoCommand, OutputValue, StoragePath,
};

/// Source call root recorded in the side-file mapping.
///
/// # Errors
///
/// Returns [`CopyError::MissingCallRoot`] if the entry is absent and
/// [`CopyError::InvalidPath`] if it does not parse.
pub fn resolve_call_root(source_detritus: &BTreeMap<String, String>) -> CopyResult<StoragePath> {
    let raw = source_detritus
        .get(CALL_ROOT_KEY)
        .ok_or(CopyError::MissingCallRoot { key: CALL_ROOT_KEY })?;
    StoragePath::parse(raw)
}

/// Rewrite file outputs below `destination_root` and emit one copy per file.
///
/// # Errors
///
/// Returns [`CopyError::InvalidPath`] for a file output whose path does not parse.
pub fn plan_outputs(
    outputs: &BTreeMap<String, OutputValue>,
    source_root: &StoragePath,
    destination_root: &StoragePath,
) -> CopyResult<(BTreeMap<String, OutputValue>, CommandSet)> {
    let mut planned = BTreeMap::new();
    let mut commands = CommandSet::new();
    for (name, value) in outputs {
        match value {
            OutputValue::File(path) => {
                let source = StoragePath::parse(path)?;
                let destination = source.relocate(source_root, destination_root);
                planned.insert(name.clone(), OutputValue::File(destination.to_string()));
                commands.insert(IoCommand::copy(source, destination));
            }
            OutputValue::Scalar(_) => {
                planned.insert(name.clone(), value.clone());
            }
        }
    }
    Ok((planned, commands))
}

/// Map side files the destination knows about and emit one copy per file.
///
/// Identifiers the destination does not expect are dropped.
///
/// # Errors
///
/// Returns [`CopyError::MissingCallRoot`] if the source mapping lacks the call
/// root, and [`CopyError::InvalidPath`] for an unparsable side-file path.
pub fn plan_detritus(
    source_detritus: &BTreeMap<String, String>,
    layout: &DestinationLayout,
) -> CopyResult<(BTreeMap<String, StoragePath>, CommandSet)> {
    if !source_detritus.contains_key(CALL_ROOT_KEY) {
        return Err(CopyError::MissingCallRoot { key: CALL_ROOT_KEY });
    }

    let mut planned = BTreeMap::from([(CALL_ROOT_KEY.to_string(), layout.call_root.clone())]);
    let mut commands = CommandSet::new();
    for (key, raw) in source_detritus {
        if key == CALL_ROOT_KEY {
            continue;
        }
        let Some(destination) = layout.detritus.get(key) else {
            continue;
        };
        let source = StoragePath::parse(raw)?;
        planned.insert(key.clone(), destination.clone());
        commands.insert(IoCommand::copy(source, destination.clone()));
    }
    Ok((planned, commands))
}

/// Build the full destination plan, outputs first, then side files.
///
/// Returns the resolved source call root alongside the plan.
///
/// # Errors
///
/// Propagates the first resolution failure.
pub fn build_plan(
    request: &CopyOutputsCommand,
    layout: &DestinationLayout,
) -> CopyResult<(StoragePath, DestinationPlan)> {
    let source_root = resolve_call_root(&request.source_detritus)?;
    let (outputs, mut commands) = plan_outputs(&request.outputs, &source_root, &layout.call_root)?;
    let (detritus, detritus_commands) = plan_detritus(&request.source_detritus, layout)?;
    commands.extend(detritus_commands);
    Ok((
        source_root,
        DestinationPlan {
            outputs,
            detritus,
            commands,
        },
    ))
}
