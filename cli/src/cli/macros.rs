/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#[macro_export]
macro_rules! cb_commands {
    ( $( $variant:ident ($ty:ty) ),+ $(,)? ) => {
        #[derive(clap::Subcommand, Debug)]
        pub enum Commands {
            $(
                #[command(
                    aliases = <$ty as $crate::cli::common::CommandMetadata>::aliases(),
                    visible_aliases = <$ty as $crate::cli::common::CommandMetadata>::visible_aliases(),
                    about = <$ty as $crate::cli::common::CommandMetadata>::about(),
                    long_about = <$ty as $crate::cli::common::CommandMetadata>::long_about(),
                    hide = <$ty as $crate::cli::common::CommandMetadata>::hide(),
                )]
                $variant($ty),
            )+
        }

        #[async_trait::async_trait]
        impl $crate::cli::CbCommand for Commands {
            async fn run(&self, ctx: &$crate::cli::common::CliContext) -> anyhow::Result<()> {
                match self {
                    $(
                        Commands::$variant(inner) => inner.run(ctx).await,
                    )+
                }
            }
        }
    };
}

pub(crate) use cb_commands;
