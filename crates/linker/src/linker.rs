use std::{io, num::NonZeroUsize};

use async_channel::unbounded;
use futures_lite::future::block_on;
use g10_errors::error;
use g10_file::InputFile;
use g10_object::g10::Object;
use g10_scheduler::ThreadPool;

use crate::{link_objects, Configuration, LinkInput};

error! {
    #[doc = "Errors raised by the link driver."]
    pub enum Error {
        #[code = E002]
        #[message = "I'm happy to link objects, but no object file was given."]
        #[help = "Try adding input object files: `g10ld <input_files> -o <output>`."]
        NoInputObjects,

        #[message = "I was not able to create the thread pool."]
        #[formatted_message("I was not able to create the thread pool: {0}.")]
        #[help = "This is an operating system limit; try again with fewer resources in use."]
        ThreadPool(io::Error),

        #[message = "The thread pool's channel has been closed prematurely."]
        #[help = "This is a bug in the toolchain; please report it."]
        ThreadPoolChannelClosed,

        #[transparent]
        File(#[from] g10_file::Error),

        #[code = E014]
        #[message = "An input file is not a G10 object."]
        #[formatted_message("`{0}` is not a G10 object file I can parse.")]
        #[help = "Object files start with the `G10O` magic; was this file produced by the assembler?"]
        MalformedObject(String),

        #[code = E014]
        #[message = "An input object file failed validation."]
        #[formatted_message("`{0}` failed validation: {1}.")]
        #[help = "The file parses but breaks a format rule; it was likely produced by a broken or incompatible toolchain."]
        InvalidObject(String, g10_object::g10::ValidationError),

        #[transparent]
        Link(#[from] crate::link::Error),

        #[message = "The program image could not be serialised."]
        #[formatted_message("The program image could not be serialised: {0}.")]
        #[help = "This is a bug in the toolchain; please report it."]
        Serialise(io::Error),
    }
}

/// The link driver: loads and validates the input objects (data-parallel,
/// one isolated task per file), runs the pipeline, and writes the image.
#[derive(Debug)]
pub struct Linker {
    configuration: Configuration,
}

impl Linker {
    pub(crate) fn with_configuration(configuration: Configuration) -> Self {
        Self { configuration }
    }

    /// Link the configured inputs into the configured output.
    pub fn link(self) -> Result<(), Error> {
        if self.configuration.input_files.is_empty() {
            return Err(Error::NoInputObjects);
        }

        let inputs = load_inputs(&self.configuration)?;
        let program = link_objects(&inputs, &self.configuration.options)?;

        let mut buffer = Vec::new();
        program.write(&mut buffer).map_err(Error::Serialise)?;

        g10_file::write_output(&self.configuration.output_file, &buffer)?;

        Ok(())
    }
}

/// Read and parse every input object. Each file is an isolated task on the
/// thread pool; results are reassembled in input order, so diagnostics and
/// link results don't depend on scheduling.
fn load_inputs(configuration: &Configuration) -> Result<Vec<LinkInput>, Error> {
    // SAFETY: It's OK to `unwrap` as 4 is not 0.
    let thread_pool = ThreadPool::new(NonZeroUsize::new(4).unwrap()).map_err(Error::ThreadPool)?;

    let (sender, receiver) = unbounded::<(usize, Result<LinkInput, Error>)>();

    for (index, path) in configuration.input_files.iter().enumerate() {
        let sender = sender.clone();
        let path = path.clone();

        thread_pool
            .execute(async move {
                let work = async {
                    let input_file = InputFile::open(&path)?;
                    let name = input_file.name();

                    let (_, object) = Object::read::<()>(input_file.bytes())
                        .map_err(|_| Error::MalformedObject(name.clone()))?;

                    object
                        .validate()
                        .map_err(|error| Error::InvalidObject(name.clone(), error))?;

                    Ok(LinkInput { name, object: object.into_owned() })
                };

                sender
                    .send((index, work.await))
                    .await
                    .expect("the loader channel has been closed prematurely");
            })
            .map_err(|_| Error::ThreadPoolChannelClosed)?;
    }

    drop(sender);

    let mut inputs: Vec<Option<LinkInput>> =
        configuration.input_files.iter().map(|_| None).collect();

    block_on(async {
        while let Ok((index, received)) = receiver.recv().await {
            inputs[index] = Some(received?);
        }

        Ok::<_, Error>(())
    })?;

    Ok(inputs
        .into_iter()
        .map(|input| input.expect("every input either loaded or errored out"))
        .collect())
}
