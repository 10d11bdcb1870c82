//! The demo's tools: a local light bulb and a handful of Windows settings
//! reached through the local helper service.

use super::{JsonType, ParameterSchema, ToolFuture, ToolRegistry, ToolSchema};
use crate::error::Result;
use crate::events::{Ui, UiEvent};
use crate::helper::HelperClient;
use futures_util::future::{self, FutureExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::info;

const COLOR_HINT: &str = "Don't use color names or descriptions, but rather a valid css rgb expression like rgb(255,0,0) if the user asks for a strong red color.";

/// State of the light bulb shown by the front end
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightState {
    pub on: bool,
    pub color: Option<String>,
}

/// Shared handle to the light bulb
#[derive(Debug, Clone, Default)]
pub struct Lights {
    state: Arc<Mutex<LightState>>,
    ui: Ui,
}

impl Lights {
    pub fn new(ui: Ui) -> Self {
        Self {
            state: Arc::default(),
            ui,
        }
    }

    pub fn snapshot(&self) -> LightState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn switch(&self, on: bool) -> &'static str {
        self.update(|state| state.on = on);
        info!("Lights switched {}", if on { "on" } else { "off" });
        "Light state changed."
    }

    pub fn set_color(&self, rgb: &str) -> &'static str {
        self.update(|state| state.color = Some(rgb.to_string()));
        info!("Light color set to {}", rgb);
        "Light color changed."
    }

    fn update(&self, change: impl FnOnce(&mut LightState)) {
        let snapshot = match self.state.lock() {
            Ok(mut state) => {
                change(&mut state);
                state.clone()
            }
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                change(&mut state);
                state.clone()
            }
        };
        self.ui.emit(UiEvent::LightChanged(snapshot));
    }
}

/// Build the registry of every tool the demo offers.
pub fn builtin_tools(lights: Lights, helper: HelperClient) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    let switch = lights.clone();
    registry.register(
        ToolSchema::function(
            "switchLights",
            "Switch lights function. Call this whenever the user asks for turning the lights on or off.",
            ParameterSchema::new().required(
                "turnOn",
                JsonType::Boolean,
                "Value indicating whether the lights should be turned on or off. Pass true for turning on the lights, or false for turning it off.",
            ),
        ),
        move |args: Value| -> ToolFuture {
            let on = args["turnOn"].as_bool().unwrap_or(false);
            future::ready(switch.switch(on).to_string()).boxed()
        },
    )?;

    let color = lights;
    registry.register(
        ToolSchema::function(
            "setLightColor",
            "Function to set the color of the lights. Call this whenever the user asks for setting the lights color to a color.",
            ParameterSchema::new().required(
                "rgb",
                JsonType::String,
                &format!("Value indicating the light color to set to. {}", COLOR_HINT),
            ),
        ),
        move |args: Value| -> ToolFuture {
            let rgb = args["rgb"].as_str().unwrap_or_default();
            future::ready(color.set_color(rgb).to_string()).boxed()
        },
    )?;

    register_post(
        &mut registry,
        &helper,
        ToolSchema::function(
            "setWindowsTheme",
            "Function to set the theme in Windows. Call this whenever the user asks for a windows computer theme change.",
            ParameterSchema::new().required(
                "theme",
                JsonType::String,
                "Value indicating the theme to set to. Use only values Light or Dark based on the user's request.",
            ),
        ),
        "theme",
        "settheme/",
    )?;

    register_post(
        &mut registry,
        &helper,
        ToolSchema::function(
            "setWindowsAccentColor",
            "Function to set the accent color in Windows. Call this whenever the user asks to change the accent color in their machine.",
            ParameterSchema::new().required(
                "rgb",
                JsonType::String,
                &format!("Value indicating the accent color to set to. {}", COLOR_HINT),
            ),
        ),
        "rgb",
        "setaccentcolor/",
    )?;

    register_post(
        &mut registry,
        &helper,
        ToolSchema::function(
            "terminateProcess",
            "Function to terminate a process in Windows. Call this whenever the user asks to close an app. \
             The id passed as parameter should be the process id from the list of processes. \
             Make sure to ask for user confirmation before calling this function since it is not reversible.",
            ParameterSchema::new().required("id", JsonType::Number, "Value indicating the process id."),
        ),
        "id",
        "TerminateProcess/",
    )?;

    register_post(
        &mut registry,
        &helper,
        ToolSchema::function(
            "launchApp",
            "Function to launch an app in Windows. Call this whenever the user asks to start an app. \
             The name passed as parameter should be the executable name for the most likely app the user wants \
             (e.g. notepad, calc, mspaint, etc), or the app URI scheme for the app (e.g. microsoft.windows.camera:). \
             If you aren't sure of the executable name, or if the request fails, you can try asking the user for the name to see if that helps.",
            ParameterSchema::new().required("name", JsonType::String, "Value indicating the app name."),
        ),
        "name",
        "LaunchApp/",
    )?;

    register_post(
        &mut registry,
        &helper,
        ToolSchema::function(
            "setTaskbarVisibility",
            "Function to set the visibility of the Taskbar in Windows. Call this whenever the user asks to change the taskbar visibility in their machine.",
            ParameterSchema::new().required(
                "show",
                JsonType::Boolean,
                "Value indicating whether the taskbar should be visible or not. Use true if the taskbar should be visible, or false to make it auto hide.",
            ),
        ),
        "show",
        "settaskbarvisibility/",
    )?;

    let processes = helper;
    registry.register(
        ToolSchema::function(
            "getProcessInfo",
            "Function to get the information about the top processes in terms of memory consumption in the machine. \
             Call this whenever the user asks about what might be using the most memory on their machine. \
             When talking about the processes back to the user reference application names instead of process names if you \
             think you know the public names of those apps. Be brief and don't repeat all the process list information. \
             Focus on what you think is most relevant to the problem.",
            ParameterSchema::new(),
        ),
        move |_args: Value| -> ToolFuture {
            let helper = processes.clone();
            async move { helper.get("GetProcessInfo/").await }.boxed()
        },
    )?;

    Ok(registry)
}

/// Register a tool that POSTs its single argument to a helper endpoint.
fn register_post(
    registry: &mut ToolRegistry,
    helper: &HelperClient,
    schema: ToolSchema,
    argument: &'static str,
    path: &'static str,
) -> Result<()> {
    let helper = helper.clone();
    registry.register(schema, move |args: Value| -> ToolFuture {
        let helper = helper.clone();
        let body = args.get(argument).cloned().unwrap_or(Value::Null);
        async move { helper.post_json(path, &body).await }.boxed()
    })
}
