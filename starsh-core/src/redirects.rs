//! Applies parsed redirections to a stream table.

use std::fs::OpenOptions;

use starsh_parser::ast::{Redirect, RedirectOperation, RedirectTarget};

use crate::env::Environment;
use crate::error;
use crate::streams::{Stream, StreamTable};
use crate::trace_categories;

/// Returns `base` layered with the given redirections, applied left to right.
///
/// Duplications alias whatever the source channel is bound to at the point they
/// are applied, so `>out 2>&1` sends both channels to `out` while `2>&1 >out` leaves
/// channel 2 on the original output. The base table is never modified.
///
/// # Arguments
///
/// * `base` - The enclosing scope's stream table.
/// * `redirects` - The redirections to apply.
/// * `env` - The environment whose working directory relative paths resolve against.
/// * `no_clobber` - Whether `>` refuses to overwrite existing files.
pub fn apply_redirects(
    base: &StreamTable,
    redirects: &[Redirect],
    env: &Environment,
    no_clobber: bool,
) -> Result<StreamTable, error::Error> {
    let mut table = base.try_clone()?;
    for redirect in redirects {
        apply_redirect(&mut table, redirect, env, no_clobber)?;
    }
    Ok(table)
}

fn apply_redirect(
    table: &mut StreamTable,
    redirect: &Redirect,
    env: &Environment,
    no_clobber: bool,
) -> Result<(), error::Error> {
    tracing::debug!(target: trace_categories::STREAMS, "applying redirect: {redirect}");

    match &redirect.target {
        RedirectTarget::Close => {
            table.remove(redirect.channel);
        }
        RedirectTarget::Channel(source) => {
            let stream = table.duplicate(*source)?;
            table.set(redirect.channel, stream);
        }
        RedirectTarget::HereDocument(doc) => {
            table.set(redirect.channel, Stream::document(doc.body.as_bytes()));
        }
        RedirectTarget::File(target) => {
            let target = target.text();
            let path = env.resolve_path(target.as_ref());

            let mut options = OpenOptions::new();
            let (readable, writable) = match redirect.operation {
                RedirectOperation::OpenRead => {
                    options.read(true);
                    (true, false)
                }
                RedirectOperation::OpenWriteTruncate if no_clobber => {
                    options.write(true).create_new(true);
                    (false, true)
                }
                RedirectOperation::OpenWriteTruncate | RedirectOperation::OpenWriteClobber => {
                    options.write(true).create(true).truncate(true);
                    (false, true)
                }
                RedirectOperation::OpenWriteAppend => {
                    options.append(true).create(true);
                    (false, true)
                }
                RedirectOperation::OpenReadWrite => {
                    options.read(true).write(true).create(true);
                    (true, true)
                }
                RedirectOperation::DuplicateRead
                | RedirectOperation::DuplicateWrite
                | RedirectOperation::CloseRead
                | RedirectOperation::CloseWrite
                | RedirectOperation::HereDocument
                | RedirectOperation::HereDocumentIndented => {
                    return Err(error::Error::Redirection(
                        target.into_owned(),
                        std::io::Error::other(format!(
                            "operator {} takes no file",
                            redirect.operation
                        )),
                    ));
                }
            };

            let file = options
                .open(&path)
                .map_err(|err| error::Error::Redirection(target.clone().into_owned(), err))?;

            table.set(
                redirect.channel,
                Stream::File {
                    file,
                    path,
                    readable,
                    writable,
                },
            );
        }
    }

    Ok(())
}
