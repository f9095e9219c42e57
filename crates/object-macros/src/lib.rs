//! Procedural macros for the `g10-object` crate.
//!
//! The only derive provided here is `ReadWrite`. It can be put on a
//! field-less `enum` with an explicit `#[repr(uN)]` and explicit
//! discriminants, and generates:
//!
//! * a `read<N, E>` constructor that parses the discriminant with the
//!   [`Number`] parser `N` and maps it back onto the variant,
//! * a `write<N, B>` method that emits the discriminant through `N`,
//! * a test that round-trips every variant in both endiannesses.
//!
//! [`Number`]: trait.Number.html

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, Attribute, Data, DataEnum, DeriveInput, Generics, Ident};

#[proc_macro_derive(ReadWrite)]
pub fn derive_enum_read_write(input: TokenStream) -> TokenStream {
    let derive_input: DeriveInput = parse(input).unwrap();

    match derive_input.data {
        Data::Enum(ref enum_data) => derive_enum_read_write_impl(
            &derive_input.ident,
            enum_data,
            &derive_input.generics,
            fetch_repr(&derive_input.attrs),
        ),
        Data::Struct(_) | Data::Union(_) => {
            panic!("`ReadWrite` cannot be derived onto `struct` or `union`")
        }
    }
}

fn derive_enum_read_write_impl(
    enum_name: &Ident,
    data: &DataEnum,
    generics: &Generics,
    repr: Option<Ident>,
) -> TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let repr = repr.expect("A `#[repr(…)]` attribute must be present");
    let (read_combinator, write_combinator) = {
        let (read, write) = match repr.to_string().as_str() {
            "u8" => ("read_u8", "write_u8"),
            "u16" => ("read_u16", "write_u16"),
            "u32" => ("read_u32", "write_u32"),
            repr => panic!("`ReadWrite` does not handle the `{repr}` representation yet"),
        };

        (
            proc_macro2::Ident::new(read, proc_macro2::Span::call_site()),
            proc_macro2::Ident::new(write, proc_macro2::Span::call_site()),
        )
    };

    let (parser_logic, variants): (Vec<_>, Vec<_>) = data
        .variants
        .iter()
        .map(|variant| {
            let name = &variant.ident;
            let discriminant = match &variant.discriminant {
                Some((_, syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::Int(int), .. }))) => int,
                _ => panic!(
                    "All variants must have a discriminant, and it must represent an integer"
                ),
            };

            (
                quote! {
                    #discriminant => Self::#name
                },
                quote! {
                    #name
                },
            )
        })
        .unzip();

    let test_name = proc_macro2::Ident::new(
        &format!("test_{}", enum_name.to_string().to_lowercase()),
        proc_macro2::Span::call_site(),
    );

    quote! {
        impl #impl_generics #enum_name #ty_generics
        #where_clause
        {
            pub fn read<'a, N, E>(input: crate::Input<'a>) -> crate::Result<'a, Self, E>
            where
                N: crate::Number,
                E: ::nom::error::ParseError<crate::Input<'a>>,
            {
                let (input, discriminant) = N::#read_combinator::<E>(input)?;

                Ok((
                    input,
                    match discriminant {
                        #( #parser_logic, )*
                        _ => return Err(::nom::Err::Error(E::from_error_kind(input, ::nom::error::ErrorKind::Alt))),
                    }
                ))
            }

            pub fn write<N, B>(&self, buffer: &mut B) -> ::std::io::Result<()>
            where
                N: crate::Number,
                B: ::std::io::Write,
            {
                buffer.write_all(&N::#write_combinator(*self as #repr))
            }
        }

        #[test]
        fn #test_name() {
            #(
                {
                    let input: #repr = #enum_name::#variants as _;

                    // Read, both endiannesses.
                    assert_eq!(
                        #enum_name::read::<crate::LittleEndian, ()>(&input.to_le_bytes()[..]),
                        Ok((&[] as &[u8], #enum_name::#variants))
                    );
                    assert_eq!(
                        #enum_name::read::<crate::BigEndian, ()>(&input.to_be_bytes()[..]),
                        Ok((&[] as &[u8], #enum_name::#variants))
                    );

                    // Write, both endiannesses.
                    let mut buffer = Vec::new();
                    #enum_name::#variants.write::<crate::LittleEndian, _>(&mut buffer).unwrap();
                    assert_eq!(buffer, &input.to_le_bytes()[..]);

                    let mut buffer = Vec::new();
                    #enum_name::#variants.write::<crate::BigEndian, _>(&mut buffer).unwrap();
                    assert_eq!(buffer, &input.to_be_bytes()[..]);
                }
            )*
        }
    }
    .into()
}

fn fetch_repr(attrs: &[Attribute]) -> Option<Ident> {
    attrs
        .iter()
        .find_map(|attr| {
            if attr.path().is_ident("repr") {
                attr.parse_args::<Ident>().ok()
            } else {
                None
            }
        })
}
