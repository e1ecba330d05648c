//! Delete command

use anyhow::{bail, Result};

use crate::cli::{DeleteArgs, GlobalArgs};
use crate::output;
use crate::utils;

pub fn run(args: DeleteArgs, global: &GlobalArgs) -> Result<()> {
    let store = utils::resource_store(global)?;
    let namespace = &args.resource.namespace;
    let name = &args.resource.name;

    if !store.request_deletion(namespace, name)? {
        bail!("Resource {}/{} not found", namespace, name);
    }
    output::success(&format!("Deletion of {}/{} requested", namespace, name));

    if !args.purge {
        output::info("Run `keel run` to uninstall its components");
        return Ok(());
    }

    let finalized = store
        .read(namespace, name)?
        .is_some_and(|r| r.metadata.finalized);
    if finalized {
        store.remove(namespace, name)?;
        output::success(&format!("{}/{} removed", namespace, name));
    } else {
        output::info(&format!(
            "{}/{} still has components to uninstall; it is kept until finalized",
            namespace, name
        ));
    }

    Ok(())
}
