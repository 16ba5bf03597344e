/// Export the `load_<name>` / `unload_<name>` entry points of a module.
///
/// Both handlers take the host context and an optional state channel:
///
/// ```rust,ignore
/// use hotswap_kernel::{HostContext, StateChannel};
///
/// fn on_load(ctx: HostContext, state: Option<&mut StateChannel>) { /* ... */ }
/// fn on_unload(ctx: HostContext, state: Option<&mut StateChannel>) { /* ... */ }
///
/// hotswap_kernel::declare_module!(counter, on_load, on_unload);
/// // exports `load_counter` and `unload_counter`
/// ```
#[macro_export]
macro_rules! declare_module {
    ($name:ident, $on_load:path, $on_unload:path) => {
        $crate::__private::paste::paste! {
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn [<load_ $name>](
                context: *mut ::core::ffi::c_void,
                channel: *mut $crate::abi::StateChannel,
            ) {
                let context = $crate::abi::HostContext::from_ptr(context);
                let channel = unsafe { $crate::abi::StateChannel::from_raw(channel) };
                $on_load(context, channel);
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn [<unload_ $name>](
                context: *mut ::core::ffi::c_void,
                channel: *mut $crate::abi::StateChannel,
            ) {
                let context = $crate::abi::HostContext::from_ptr(context);
                let channel = unsafe { $crate::abi::StateChannel::from_raw(channel) };
                $on_unload(context, channel);
            }
        }
    };
}
